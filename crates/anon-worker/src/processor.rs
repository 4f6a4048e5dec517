//! Processing adapter: decode, classify, mask, save frames.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use anon_media::{mask_frame, write_frames, Frame, FrameDecoder, PatternClassifier};
use anon_models::Identifier;

use crate::error::{WorkerError, WorkerResult};

/// Turns a local video into a directory of masked frames, or nothing.
#[derive(Clone)]
pub struct Processor {
    decoder: Arc<dyn FrameDecoder>,
    classifier: Arc<dyn PatternClassifier>,
}

impl Processor {
    pub fn new(decoder: Arc<dyn FrameDecoder>, classifier: Arc<dyn PatternClassifier>) -> Self {
        Self {
            decoder,
            classifier,
        }
    }

    /// Process the video at `local_path`.
    ///
    /// Returns the identifier of `<output_root>/<id>/` when the video shows
    /// the target pattern, `None` when it does not or is not applicable.
    pub async fn process(
        &self,
        local_path: &Path,
        output_root: &Path,
    ) -> WorkerResult<Option<Identifier>> {
        if !is_candidate(local_path) {
            debug!(path = %local_path.display(), "Not an applicable video");
            return Ok(None);
        }

        let frames = self
            .decoder
            .decode(local_path)
            .await
            .map_err(WorkerError::Processing)?;

        let matched = self
            .classifier
            .is_target_pattern(local_path)
            .await
            .map_err(WorkerError::Processing)?;
        if !matched {
            info!(path = %local_path.display(), "Video rejected by classifier");
            return Ok(None);
        }

        let identifier = Identifier::from_path(local_path);
        let result_dir = output_root.join(identifier.as_str());
        let count = mask_and_save(frames, result_dir).await?;

        info!(
            path = %local_path.display(),
            identifier = %identifier,
            frames = count,
            "Wrote masked frames"
        );
        Ok(Some(identifier))
    }
}

async fn mask_and_save(frames: Vec<Frame>, result_dir: PathBuf) -> WorkerResult<usize> {
    tokio::task::spawn_blocking(move || {
        let mut frames = frames;
        frames.iter_mut().for_each(mask_frame);

        write_frames(&frames, &result_dir).map_err(|e| {
            if let Err(cleanup) = std::fs::remove_dir_all(&result_dir) {
                warn!(dir = %result_dir.display(), "Failed to remove partial result: {}", cleanup);
            }
            WorkerError::Processing(e)
        })
    })
    .await
    .map_err(|e| WorkerError::task_failed(format!("frame writer: {}", e)))?
}

/// Visible `.mp4` files only.
fn is_candidate(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if name.starts_with('.') {
        return false;
    }
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("mp4"))
        .unwrap_or(false)
}
