//! Work items for queue processing.

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

use crate::error::{ModelError, ModelResult};

/// One unit of queued work: the raw bytes of a URL pointing at an
/// encrypted payload.
///
/// The queue treats items as opaque tokens, so the bytes are kept exactly as
/// delivered and handed back unchanged on completion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkItem(Vec<u8>);

impl WorkItem {
    /// Create from raw queue bytes.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Get the raw queue bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consume into the raw queue bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Decode the item as an `http`/`https` URL.
    pub fn url(&self) -> ModelResult<Url> {
        let text = std::str::from_utf8(&self.0).map_err(|_| ModelError::NotUtf8)?;
        let url = Url::parse(text.trim()).map_err(|e| ModelError::invalid_url(e.to_string()))?;

        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(ModelError::invalid_url(format!("unsupported scheme '{}'", other))),
        }
    }
}

impl From<&str> for WorkItem {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<String> for WorkItem {
    fn from(s: String) -> Self {
        Self(s.into_bytes())
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}
