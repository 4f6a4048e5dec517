//! Object store clients for result bundles.
//!
//! This crate provides:
//! - The `ObjectStore` capability used by the publisher
//! - OpenStack Swift client with Keystone v3 token auth
//! - S3-compatible client

pub mod error;
pub mod s3;
pub mod store;
pub mod swift;

pub use error::{StorageError, StorageResult};
pub use s3::{S3Config, S3Store};
pub use store::ObjectStore;
pub use swift::{SwiftClient, SwiftConfig};
