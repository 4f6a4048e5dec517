//! Lease queue contract and configuration.

use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha224};

use anon_models::WorkItem;

use crate::error::QueueResult;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis host
    pub host: String,
    /// Redis port
    pub port: u16,
    /// Name of the main work list
    pub name: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            name: "job".to_string(),
        }
    }
}

impl QueueConfig {
    /// Connection URL for the Redis client.
    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}/", self.host, self.port)
    }

    /// List holding items that are currently leased.
    pub fn processing_key(&self) -> String {
        format!("{}:processing", self.name)
    }

    /// Key whose existence marks a live lease on `item`.
    pub fn lease_key(&self, item: &WorkItem) -> String {
        format!("{}:leased_by_session:{}", self.name, item_key(item))
    }

    /// Side queue for items that need operator inspection.
    pub fn error_queue_name(&self) -> String {
        format!("{}:errors", self.name)
    }
}

/// Stable key for an item: hex SHA-224 of its bytes.
pub fn item_key(item: &WorkItem) -> String {
    format!("{:x}", Sha224::digest(item.as_bytes()))
}

/// Queue primitives the worker loop relies on.
///
/// Lease ownership and expiry are enforced by the queue, never by the worker.
#[async_trait]
pub trait LeaseQueue: Send + Sync {
    /// True only when no unclaimed and no leased items remain.
    async fn empty(&self) -> QueueResult<bool>;

    /// Claim one item for `lease`.
    ///
    /// With `block`, waits up to `poll_timeout` for an item before returning
    /// `None`.
    async fn lease(
        &self,
        lease: Duration,
        block: bool,
        poll_timeout: Duration,
    ) -> QueueResult<Option<WorkItem>>;

    /// Acknowledge `item` as permanently processed. Safe to repeat.
    async fn complete(&self, item: &WorkItem) -> QueueResult<()>;

    /// Return every item whose lease ran out to the main queue.
    ///
    /// Returns the number of reclaimed items.
    async fn check_expired_leases(&self) -> QueueResult<usize>;

    /// Push `item` onto the side queue `queue_name`.
    async fn insert_error_queue(&self, queue_name: &str, item: &WorkItem) -> QueueResult<()>;

    /// Name of this queue's error-inspection side queue.
    fn error_queue_name(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let config = QueueConfig::default();
        let item = WorkItem::from("http://host/a");

        assert_eq!(config.redis_url(), "redis://localhost:6379/");
        assert_eq!(config.processing_key(), "job:processing");
        assert_eq!(config.error_queue_name(), "job:errors");
        assert!(config.lease_key(&item).starts_with("job:leased_by_session:"));
    }

    #[test]
    fn test_item_key_is_sha224_hex() {
        let key = item_key(&WorkItem::from(""));
        assert_eq!(key, "d14a028c2a3a2bc9476102bb288234c415a2b01f828ea62ac5b3e42f");
    }
}
