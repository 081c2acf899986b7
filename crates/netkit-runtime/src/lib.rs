//! # netkit-runtime
//!
//! Thread-level building blocks for netkit.
//!
//! This crate provides:
//! - `ManagedThread` - one OS thread with a `setup → process* → cleanup`
//!   lifecycle and cooperative stop
//! - `WorkQueue` - two-sided FIFO; producers and consumers lock different sides
//! - `ThreadPool` - fixed set of managed threads draining a `WorkQueue` of tasks
//! - `PoolConfig` - pool sizing and timing with environment overrides

pub mod config;
pub mod thread;
pub mod work_queue;
pub mod pool;

// Re-exports
pub use config::PoolConfig;
pub use thread::{ManagedThread, ThreadContext, ThreadState, Worker};
pub use work_queue::WorkQueue;
pub use pool::{Task, TaskStatus, ThreadPool};
