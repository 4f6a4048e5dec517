//! Media handling for video work items.
//!
//! This crate provides:
//! - Frame decoding through the FFmpeg CLI
//! - The target-pattern classifier capability
//! - The fixed redaction mask applied to every frame
//! - Lossless frame output and zip packaging of result directories

pub mod archive;
pub mod classifier;
pub mod command;
pub mod decoder;
pub mod error;
pub mod frames;
pub mod mask;
pub mod probe;

pub use archive::package_directory;
pub use classifier::{CommandClassifier, PatternClassifier};
pub use command::{FfmpegCommand, FfmpegRunner};
pub use decoder::{FfmpegFrameDecoder, FrameDecoder};
pub use error::{MediaError, MediaResult};
pub use frames::write_frames;
pub use mask::{mask_frame, MaskRegion};
pub use probe::{probe_video, VideoInfo};

/// Decoded RGB frame.
pub type Frame = image::RgbImage;
