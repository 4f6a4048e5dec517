//! Worker error types.

use thiserror::Error;

use crate::cipher::CipherError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Startup failed: {0}")]
    StartupFailed(String),

    #[error("Invalid work item: {0}")]
    InvalidItem(#[from] anon_models::ModelError),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Payload rejected: {0}")]
    Payload(#[from] CipherError),

    #[error("Failed to write local artifact: {0}")]
    DiskWrite(#[source] std::io::Error),

    #[error("Processing failed: {0}")]
    Processing(#[source] anon_media::MediaError),

    #[error("Packaging failed: {0}")]
    Packaging(#[source] anon_media::MediaError),

    #[error("Publish failed: {0}")]
    Publish(#[from] anon_storage::StorageError),

    #[error("Queue error: {0}")]
    Queue(#[from] anon_queue::QueueError),

    #[error("Task failed: {0}")]
    TaskFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn startup_failed(msg: impl Into<String>) -> Self {
        Self::StartupFailed(msg.into())
    }

    pub fn task_failed(msg: impl Into<String>) -> Self {
        Self::TaskFailed(msg.into())
    }

    /// Startup failures end the process; everything else is per item.
    pub fn is_fatal(&self) -> bool {
        matches!(self, WorkerError::ConfigError(_) | WorkerError::StartupFailed(_))
    }

    /// Taxonomy label used in logs and the failure counter.
    pub fn stage(&self) -> &'static str {
        match self {
            WorkerError::ConfigError(_) => "configuration",
            WorkerError::StartupFailed(_) => "startup",
            WorkerError::InvalidItem(_) => "invalid_item",
            WorkerError::Network(_) => "network",
            WorkerError::Payload(CipherError::Authentication) => "authentication",
            WorkerError::Payload(_) => "malformed_payload",
            WorkerError::DiskWrite(_) => "disk_write",
            WorkerError::Processing(_) => "processing",
            WorkerError::Packaging(_) => "packaging",
            WorkerError::Publish(_) => "publish",
            WorkerError::Queue(_) => "queue",
            WorkerError::TaskFailed(_) => "task",
            WorkerError::Io(_) => "io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_errors() {
        assert!(WorkerError::config_error("ENCRYPTION_KEY missing").is_fatal());
        assert!(WorkerError::startup_failed("redis unreachable").is_fatal());
        assert!(!WorkerError::Payload(CipherError::Authentication).is_fatal());
        assert!(!WorkerError::task_failed("panicked").is_fatal());
    }

    #[test]
    fn test_cipher_stages_are_distinct() {
        assert_eq!(
            WorkerError::Payload(CipherError::Authentication).stage(),
            "authentication"
        );
        assert_eq!(
            WorkerError::Payload(CipherError::MalformedPayload(3)).stage(),
            "malformed_payload"
        );
    }

    #[test]
    fn test_media_stages_are_distinct() {
        let processing = WorkerError::Processing(anon_media::MediaError::InvalidVideo("x".into()));
        let packaging = WorkerError::Packaging(anon_media::MediaError::packaging("x"));
        assert_eq!(processing.stage(), "processing");
        assert_eq!(packaging.stage(), "packaging");
    }
}
