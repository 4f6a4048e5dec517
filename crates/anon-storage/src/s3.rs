//! S3-compatible object store client.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::BucketCannedAcl;
use aws_sdk_s3::Client;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use crate::store::ObjectStore;

/// Configuration for the S3 client.
#[derive(Clone)]
pub struct S3Config {
    /// S3 API endpoint URL
    pub endpoint_url: String,
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// Region ("auto" for most S3-compatible stores)
    pub region: String,
}

impl std::fmt::Debug for S3Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Config")
            .field("endpoint_url", &self.endpoint_url)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("region", &self.region)
            .finish()
    }
}

/// S3-compatible store. Containers map to buckets.
#[derive(Clone)]
pub struct S3Store {
    client: Client,
    endpoint_url: String,
}

impl S3Store {
    /// Create a new client from configuration.
    pub fn new(config: S3Config) -> Self {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "anon-worker",
        );

        let sdk_config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint_url)
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(sdk_config),
            endpoint_url: config.endpoint_url.trim_end_matches('/').to_string(),
        }
    }

    /// Public URL of an object.
    pub fn object_url(&self, bucket: &str, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint_url, bucket, key)
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn create_public_container(&self, name: &str) -> StorageResult<()> {
        let exists = self.client.head_bucket().bucket(name).send().await.is_ok();

        if exists {
            self.client
                .put_bucket_acl()
                .bucket(name)
                .acl(BucketCannedAcl::PublicRead)
                .send()
                .await
                .map_err(|e| StorageError::container_failed(e.to_string()))?;
        } else {
            self.client
                .create_bucket()
                .bucket(name)
                .acl(BucketCannedAcl::PublicRead)
                .send()
                .await
                .map_err(|e| StorageError::container_failed(e.to_string()))?;
        }

        info!(bucket = %name, created = !exists, "Bucket is public");
        Ok(())
    }

    async fn put_object(&self, container: &str, key: &str, body: Vec<u8>) -> StorageResult<String> {
        debug!("Uploading {} bytes to {}/{}", body.len(), container, key);

        self.client
            .put_object()
            .bucket(container)
            .key(key)
            .body(ByteStream::from(body))
            .content_type("application/zip")
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        Ok(self.object_url(container, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> S3Config {
        S3Config {
            endpoint_url: "https://s3.example.com/".to_string(),
            access_key_id: "AKID".to_string(),
            secret_access_key: "shh".to_string(),
            region: "auto".to_string(),
        }
    }

    #[test]
    fn test_object_url() {
        let store = S3Store::new(config());
        assert_eq!(
            store.object_url("job-results", "abc.zip"),
            "https://s3.example.com/job-results/abc.zip"
        );
    }

    #[test]
    fn test_debug_redacts_secret() {
        assert!(!format!("{:?}", config()).contains("shh"));
    }
}
