//! Target-pattern classification.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};

/// Decides whether a video shows the target content pattern.
#[async_trait]
pub trait PatternClassifier: Send + Sync {
    async fn is_target_pattern(&self, path: &Path) -> MediaResult<bool>;
}

/// Classifier delegating to an external program.
///
/// The program receives the video path as its last argument and answers with
/// its exit status: 0 for a match, 1 for no match. Any other status, or
/// death by signal, is a classifier failure.
#[derive(Debug, Clone)]
pub struct CommandClassifier {
    program: PathBuf,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandClassifier {
    /// Resolve `program` on `PATH` (or as a path) and build a classifier.
    pub fn new(program: impl AsRef<str>) -> MediaResult<Self> {
        let program = program.as_ref();
        let resolved = which::which(program)
            .map_err(|_| MediaError::ClassifierNotFound(program.to_string()))?;

        Ok(Self {
            program: resolved,
            args: Vec::new(),
            timeout: None,
        })
    }

    /// Extra arguments placed before the video path.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Bound a single classification.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

#[async_trait]
impl PatternClassifier for CommandClassifier {
    async fn is_target_pattern(&self, path: &Path) -> MediaResult<bool> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, child.wait_with_output())
                .await
                .map_err(|_| MediaError::Timeout(timeout.as_secs()))??,
            None => child.wait_with_output().await?,
        };

        match output.status.code() {
            Some(0) => {
                debug!(path = %path.display(), "Classifier matched target pattern");
                Ok(true)
            }
            Some(1) => {
                debug!(path = %path.display(), "Classifier rejected video");
                Ok(false)
            }
            code => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                warn!(path = %path.display(), ?code, "Classifier failed: {}", stderr.trim());
                Err(MediaError::classifier_failed(
                    format!("{} exited abnormally", self.program.display()),
                    code,
                ))
            }
        }
    }
}
