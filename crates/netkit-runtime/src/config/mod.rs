//! Thread pool configuration
//!
//! Compile-time defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder calls
//! 2. Environment variables (`from_env`)
//! 3. Library defaults
//!
//! # Example
//!
//! ```rust,ignore
//! use netkit_runtime::PoolConfig;
//!
//! let config = PoolConfig::from_env()
//!     .workers(8)
//!     .idle_delay(Duration::from_micros(200));
//! ```

pub mod defaults;

use std::time::Duration;

use netkit_core::env::{env_get, env_get_micros, env_get_millis, env_get_str};
use netkit_core::error::{NetError, Result};

/// Thread pool configuration with builder pattern.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker threads
    pub workers: usize,
    /// Sleep between polls when the queue is empty
    pub idle_delay: Duration,
    /// Max tasks per `process()` call
    pub batch: usize,
    /// `wait_all()` poll interval
    pub drain_poll: Duration,
    /// Thread name prefix
    pub name_prefix: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl PoolConfig {
    /// Create config from compile-time defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `NETKIT_POOL_WORKERS` - Number of worker threads (0 = auto)
    /// - `NETKIT_POOL_IDLE_US` - Idle poll delay in microseconds
    /// - `NETKIT_POOL_BATCH` - Tasks per process() call
    /// - `NETKIT_POOL_DRAIN_POLL_MS` - wait_all() poll interval
    /// - `NETKIT_POOL_NAME` - Thread name prefix
    pub fn from_env() -> Self {
        let workers = match env_get("NETKIT_POOL_WORKERS", defaults::NUM_WORKERS) {
            0 => defaults::auto_workers(),
            n => n,
        };
        Self {
            workers,
            idle_delay: env_get_micros("NETKIT_POOL_IDLE_US", defaults::IDLE_DELAY_US),
            batch: env_get("NETKIT_POOL_BATCH", defaults::BATCH),
            drain_poll: env_get_millis("NETKIT_POOL_DRAIN_POLL_MS", defaults::DRAIN_POLL_MS),
            name_prefix: env_get_str("NETKIT_POOL_NAME", defaults::NAME_PREFIX),
        }
    }

    /// Create config with explicit defaults (no env override).
    /// Useful for testing or when you want full control.
    pub fn new() -> Self {
        Self {
            workers: defaults::auto_workers(),
            idle_delay: Duration::from_micros(defaults::IDLE_DELAY_US),
            batch: defaults::BATCH,
            drain_poll: Duration::from_millis(defaults::DRAIN_POLL_MS),
            name_prefix: defaults::NAME_PREFIX.to_string(),
        }
    }

    // Builder methods

    pub fn workers(mut self, n: usize) -> Self {
        self.workers = n;
        self
    }

    pub fn idle_delay(mut self, d: Duration) -> Self {
        self.idle_delay = d;
        self
    }

    pub fn batch(mut self, n: usize) -> Self {
        self.batch = n;
        self
    }

    pub fn drain_poll(mut self, d: Duration) -> Self {
        self.drain_poll = d;
        self
    }

    pub fn name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    /// Validate configuration and return errors if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(NetError::Config("workers must be > 0"));
        }
        if self.workers > defaults::MAX_WORKERS {
            return Err(NetError::Config("workers must be <= 256"));
        }
        if self.batch == 0 {
            return Err(NetError::Config("batch must be > 0"));
        }
        if self.drain_poll.is_zero() {
            return Err(NetError::Config("drain_poll must be > 0"));
        }
        Ok(())
    }
}
