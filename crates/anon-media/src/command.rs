//! FFmpeg command builder and runner.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};

/// FFmpeg output target meaning "write to stdout".
const STDOUT_TARGET: &str = "pipe:1";
const LOG_LEVEL: &str = "error";

/// Arguments of one FFmpeg invocation that streams its output to stdout.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    input: PathBuf,
    output_args: Vec<String>,
}

impl FfmpegCommand {
    pub fn to_stdout(input: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output_args: Vec::new(),
        }
    }

    /// Emit every decoded frame as packed 8-bit RGB, no container.
    pub fn raw_rgb_frames(mut self) -> Self {
        self.output_args
            .extend(["-an", "-f", "rawvideo", "-pix_fmt", "rgb24"].map(String::from));
        self
    }

    /// `ffmpeg` argv, program name excluded.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec![
            "-nostdin".to_string(),
            "-v".to_string(),
            LOG_LEVEL.to_string(),
            "-i".to_string(),
            self.input.to_string_lossy().to_string(),
        ];
        args.extend(self.output_args.iter().cloned());
        args.push(STDOUT_TARGET.to_string());
        args
    }
}

/// Runner for FFmpeg commands.
#[derive(Debug, Default)]
pub struct FfmpegRunner {
    /// Timeout for one invocation
    timeout: Option<Duration>,
}

impl FfmpegRunner {
    /// Create a new runner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Run an FFmpeg command and collect everything it writes to stdout.
    pub async fn capture_stdout(&self, cmd: &FfmpegCommand) -> MediaResult<Vec<u8>> {
        check_ffmpeg()?;

        let args = cmd.build_args();
        debug!("Running FFmpeg: ffmpeg {}", args.join(" "));

        let child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, child.wait_with_output()).await {
                Ok(output) => output?,
                Err(_) => {
                    // Dropping the future kills the child.
                    warn!("FFmpeg timed out after {:?}", timeout);
                    return Err(MediaError::Timeout(timeout.as_secs()));
                }
            },
            None => child.wait_with_output().await?,
        };

        if output.status.success() {
            Ok(output.stdout)
        } else {
            Err(MediaError::ffmpeg_failed(
                "FFmpeg exited with non-zero status",
                Some(String::from_utf8_lossy(&output.stderr).to_string()),
                output.status.code(),
            ))
        }
    }
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Check if FFprobe is available.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}
