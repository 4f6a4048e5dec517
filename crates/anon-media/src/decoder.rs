//! Frame decoding.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::probe::{probe_video, VideoInfo};
use crate::Frame;

/// Turns a video file into its sequence of frames, in temporal order.
#[async_trait]
pub trait FrameDecoder: Send + Sync {
    async fn decode(&self, path: &Path) -> MediaResult<Vec<Frame>>;
}

/// Decoder backed by the FFmpeg CLI.
///
/// Probes the frame size, then has FFmpeg emit raw RGB24 frames on stdout.
#[derive(Debug, Clone, Default)]
pub struct FfmpegFrameDecoder {
    timeout: Option<Duration>,
}

impl FfmpegFrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound a single decode.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl FrameDecoder for FfmpegFrameDecoder {
    async fn decode(&self, path: &Path) -> MediaResult<Vec<Frame>> {
        let info = probe_video(path).await?;
        debug!(
            path = %path.display(),
            width = info.width,
            height = info.height,
            codec = %info.codec,
            reported_frames = ?info.frame_count,
            "Probed video"
        );

        let mut runner = FfmpegRunner::new();
        if let Some(timeout) = self.timeout {
            runner = runner.with_timeout(timeout);
        }
        let cmd = FfmpegCommand::to_stdout(path).raw_rgb_frames();
        let raw = runner.capture_stdout(&cmd).await?;

        let frames = split_frames(raw, &info)?;
        if let Some(reported) = info.frame_count {
            if reported != frames.len() as u64 {
                debug!(reported, decoded = frames.len(), "Container frame count differs from decoded stream");
            }
        }
        info!(path = %path.display(), frames = frames.len(), "Decoded video");
        Ok(frames)
    }
}

/// Split packed RGB24 bytes into frames of the probed size.
pub fn split_frames(raw: Vec<u8>, info: &VideoInfo) -> MediaResult<Vec<Frame>> {
    let (width, height) = (info.width, info.height);
    let frame_len = info.rgb_frame_len();
    if frame_len == 0 {
        return Err(MediaError::InvalidVideo("Zero-sized frames".to_string()));
    }
    if raw.len() % frame_len != 0 {
        return Err(MediaError::InvalidVideo(format!(
            "Raw stream of {} bytes is not a whole number of {}x{} frames",
            raw.len(),
            width,
            height
        )));
    }

    raw.chunks_exact(frame_len)
        .map(|chunk| {
            Frame::from_raw(width, height, chunk.to_vec())
                .ok_or_else(|| MediaError::InvalidVideo("Frame buffer size mismatch".to_string()))
        })
        .collect()
}
