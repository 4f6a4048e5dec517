//! Lease-based work queue.
//!
//! This crate provides:
//! - The `LeaseQueue` contract: lease, complete, expiry reclamation, error queue
//! - A Redis implementation shared by every worker replica
//! - An in-process implementation for tests and local runs

pub mod error;
pub mod memory;
pub mod queue;
pub mod redis_queue;

pub use error::{QueueError, QueueResult};
pub use memory::MemoryQueue;
pub use queue::{LeaseQueue, QueueConfig};
pub use redis_queue::RedisWorkQueue;
