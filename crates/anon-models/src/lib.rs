//! Shared data models for the anonymisation worker.
//!
//! This crate provides:
//! - Work items as delivered by the lease queue
//! - Content-derived identifiers naming result directories and bundles
//! - The lease lifecycle state machine

pub mod error;
pub mod identifier;
pub mod item;
pub mod lease;

pub use error::{ModelError, ModelResult};
pub use identifier::{frame_file_name, Identifier};
pub use item::WorkItem;
pub use lease::LeaseState;
