//! Structured per-item logging.

use tracing::{error, info, warn};

use anon_models::WorkItem;

/// Item logger attaching the item and operation to every event.
#[derive(Debug, Clone)]
pub struct ItemLogger {
    item: String,
    operation: String,
}

impl ItemLogger {
    pub fn new(item: &WorkItem, operation: &str) -> Self {
        Self {
            item: item.to_string(),
            operation: operation.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            item = %self.item,
            operation = %self.operation,
            "Item started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            item = %self.item,
            operation = %self.operation,
            "Item progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            item = %self.item,
            operation = %self.operation,
            "Item warning: {}", message
        );
    }

    /// Log a failure with its taxonomy stage.
    pub fn log_error(&self, stage: &str, message: &str) {
        error!(
            item = %self.item,
            operation = %self.operation,
            stage,
            "Item error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            item = %self.item,
            operation = %self.operation,
            "Item completed: {}", message
        );
    }
}
