//! Lossless frame output.

use std::path::Path;

use image::ImageFormat;
use tracing::debug;

use anon_models::frame_file_name;

use crate::error::MediaResult;
use crate::Frame;

/// Save `frames` as PNGs under `dir`, named by frame order index.
///
/// Index width grows past five digits for long videos so names keep sorting
/// in frame order.
///
/// Creates `dir` if needed. Returns the number of frames written.
pub fn write_frames(frames: &[Frame], dir: &Path) -> MediaResult<usize> {
    std::fs::create_dir_all(dir)?;

    for (index, frame) in frames.iter().enumerate() {
        let path = dir.join(frame_file_name(index, frames.len()));
        frame.save_with_format(&path, ImageFormat::Png)?;
    }

    debug!(dir = %dir.display(), count = frames.len(), "Wrote frames");
    Ok(frames.len())
}
