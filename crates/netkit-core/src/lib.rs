//! # netkit-core
//!
//! Core types shared by every netkit crate.
//!
//! This crate holds no threads and no sockets. It defines the pieces the
//! runtime and reactor crates are built from, and the two collaborator
//! interfaces the application supplies.
//!
//! ## Modules
//!
//! - `log` - Leveled log sink trait, stderr/memory sinks, `k*!` macros
//! - `env` - Environment variable utilities
//! - `error` - Error type and `Result` alias
//! - `spinlock` - Short-critical-section lock used by the work queue
//! - `store` - Key/value collaborator trait and in-memory store
//! - `event` - `ConnectionEvent`, the unit handed from reactor to pool
//!
//! Collaborators are passed explicitly. There is no process-wide default
//! logger or store; every component receives an `Arc<dyn LogSink>` at
//! construction.

pub mod log;
pub mod env;
pub mod error;
pub mod spinlock;
pub mod store;
pub mod event;

// Re-exports for convenience
pub use log::{LogLevel, LogSink, MemorySink, NullSink, StderrSink};
pub use env::{env_get, env_get_bool, env_get_opt, env_get_str, env_is_set};
pub use error::{NetError, Result};
pub use spinlock::SpinLock;
pub use store::{KvStore, MemoryStore};
pub use event::{ConnectionEvent, EventKind};
