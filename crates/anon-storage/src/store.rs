//! Object store capability.

use async_trait::async_trait;

use crate::error::StorageResult;

/// Destination for result bundles.
///
/// Credentials and sessions are the implementation's concern.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create `name` as a publicly readable container, or make an existing
    /// one public.
    async fn create_public_container(&self, name: &str) -> StorageResult<()>;

    /// Store `body` under `key` and return the object's URL.
    async fn put_object(&self, container: &str, key: &str, body: Vec<u8>) -> StorageResult<String>;
}
