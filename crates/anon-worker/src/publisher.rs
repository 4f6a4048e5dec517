//! Result packaging and publishing.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use anon_models::Identifier;
use anon_storage::{ObjectStore, StorageError};

use crate::error::{WorkerError, WorkerResult};

/// `<output_root>/<identifier>.zip`
pub fn bundle_path(output_root: &Path, identifier: &Identifier) -> PathBuf {
    output_root.join(identifier.bundle_name())
}

/// Zip `<output_root>/<identifier>/` into its bundle.
pub async fn package(output_root: &Path, identifier: &Identifier) -> WorkerResult<PathBuf> {
    let dir = output_root.join(identifier.as_str());
    let bundle = bundle_path(output_root, identifier);

    tokio::task::spawn_blocking(move || anon_media::package_directory(&dir, &bundle))
        .await
        .map_err(|e| WorkerError::task_failed(format!("packager: {}", e)))?
        .map_err(WorkerError::Packaging)
}

/// Uploads bundles and removes local results once they are safely stored.
#[derive(Clone)]
pub struct Publisher {
    store: Arc<dyn ObjectStore>,
}

impl Publisher {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Create the results container, public-read.
    pub async fn prepare_container(&self, container: &str) -> WorkerResult<()> {
        self.store.create_public_container(container).await?;
        info!(container, "Results container ready");
        Ok(())
    }

    /// Upload `bundle_path` under its file name into `container`.
    ///
    /// On success the bundle and its sibling result directory are deleted; a
    /// cleanup failure is logged and never turns a stored upload into an error.
    /// On failure both stay on disk.
    pub async fn publish(&self, bundle_path: &Path, container: &str) -> WorkerResult<String> {
        let key = bundle_path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| {
                StorageError::upload_failed(format!("{} has no file name", bundle_path.display()))
            })?;

        let body = tokio::fs::read(bundle_path).await?;
        let size = body.len();
        let url = self.store.put_object(container, &key, body).await?;
        info!(container, key = %key, size, url = %url, "Published bundle");

        let result_dir = bundle_path.with_extension("");
        if let Err(e) = tokio::fs::remove_dir_all(&result_dir).await {
            warn!(dir = %result_dir.display(), "Failed to remove result directory: {}", e);
        }
        if let Err(e) = tokio::fs::remove_file(bundle_path).await {
            warn!(bundle = %bundle_path.display(), "Failed to remove published bundle: {}", e);
        }

        Ok(url)
    }
}
