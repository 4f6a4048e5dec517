//! Anonymisation queue worker.
//!
//! This crate provides:
//! - AES-GCM payload decryption
//! - Fetching and local persistence of work item videos
//! - The processing adapter over the decoder and classifier capabilities
//! - Packaging, publishing and the bounded completion task set
//! - The lease-driven worker loop

pub mod cipher;
pub mod completion;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod fetcher;
pub mod logging;
pub mod metrics;
pub mod processor;
pub mod publisher;

pub use cipher::{Cipher, CipherError, CipherKey, EncryptedPayload};
pub use completion::{complete_item, CompletionContext, CompletionOutcome};
pub use config::{EnvSource, StorageBackend, WorkerConfig};
pub use coordinator::{CompletionCoordinator, DrainReport};
pub use error::{WorkerError, WorkerResult};
pub use executor::{LoopSettings, RunSummary, WorkerLoop};
pub use fetcher::{Fetcher, LocalArtifact};
pub use logging::ItemLogger;
pub use processor::Processor;
pub use publisher::{bundle_path, package, Publisher};
