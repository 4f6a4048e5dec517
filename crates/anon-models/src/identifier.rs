//! Content-derived identifiers for result directories and bundles.

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Minimum width of the zero-padded frame index in output file names.
const FRAME_INDEX_WIDTH: usize = 5;

/// Hex digest naming one item's output directory (`<id>/`) and bundle
/// (`<id>.zip`).
///
/// Derived from the local artifact's path string, not its content. MD5 is
/// used for naming only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    /// Compute the identifier for a local file path.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_string_lossy();
        let digest = Md5::digest(path.as_bytes());
        Self(format!("{:x}", digest))
    }

    /// Create from an existing hex string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name of the bundle for this identifier.
    pub fn bundle_name(&self) -> String {
        format!("{}.zip", self.0)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// File name for the frame at `index` of a `frame_count`-frame video.
///
/// Zero-padded to at least five digits, widened so the last index still
/// fits. Lexical order then matches temporal order within one video.
pub fn frame_file_name(index: usize, frame_count: usize) -> String {
    let last = frame_count.saturating_sub(1).max(index);
    let digits = last.checked_ilog10().map_or(1, |d| d as usize + 1);
    format!("{:0width$}.png", index, width = digits.max(FRAME_INDEX_WIDTH))
}
