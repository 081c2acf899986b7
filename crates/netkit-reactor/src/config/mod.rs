//! Reactor configuration
//!
//! Compile-time defaults with runtime environment overrides, same scheme as
//! `netkit_runtime::PoolConfig`.

pub mod defaults;

use std::time::Duration;

use netkit_core::env::{env_get, env_get_micros, env_get_millis, env_get_str};
use netkit_core::error::{NetError, Result};

/// Reactor configuration with builder pattern.
#[derive(Debug, Clone)]
pub struct ReactorConfig {
    /// Bounded `epoll_wait` timeout
    pub poll_timeout: Duration,
    /// Events per wait
    pub max_events: usize,
    /// Read buffer size
    pub read_buffer: usize,
    /// Listen backlog
    pub backlog: i32,
    /// Outbox capacity
    pub outbox_capacity: usize,
    /// Client stabilization delay before first send
    pub settle_delay: Duration,
    /// Client connect attempts
    pub connect_attempts: usize,
    /// Pause between connect attempts
    pub connect_backoff: Duration,
    /// Delay between loop iterations
    pub loop_delay: Duration,
    /// Thread name prefix
    pub name_prefix: String,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ReactorConfig {
    /// Create config from compile-time defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `NETKIT_POLL_TIMEOUT_MS` - epoll_wait timeout
    /// - `NETKIT_MAX_EVENTS` - events per wait
    /// - `NETKIT_READ_BUFFER` - read buffer size in bytes
    /// - `NETKIT_BACKLOG` - listen backlog
    /// - `NETKIT_OUTBOX_CAPACITY` - outbound queue capacity
    /// - `NETKIT_SETTLE_MS` - client stabilization delay
    /// - `NETKIT_CONNECT_ATTEMPTS` - client connect attempts
    /// - `NETKIT_CONNECT_BACKOFF_MS` - pause between connect attempts
    /// - `NETKIT_LOOP_DELAY_US` - delay between iterations
    /// - `NETKIT_REACTOR_NAME` - thread name prefix
    pub fn from_env() -> Self {
        Self {
            poll_timeout: env_get_millis("NETKIT_POLL_TIMEOUT_MS", defaults::POLL_TIMEOUT_MS),
            max_events: env_get("NETKIT_MAX_EVENTS", defaults::MAX_EVENTS),
            read_buffer: env_get("NETKIT_READ_BUFFER", defaults::READ_BUFFER),
            backlog: env_get("NETKIT_BACKLOG", defaults::BACKLOG),
            outbox_capacity: env_get("NETKIT_OUTBOX_CAPACITY", defaults::OUTBOX_CAPACITY),
            settle_delay: env_get_millis("NETKIT_SETTLE_MS", defaults::SETTLE_MS),
            connect_attempts: env_get("NETKIT_CONNECT_ATTEMPTS", defaults::CONNECT_ATTEMPTS),
            connect_backoff: env_get_millis("NETKIT_CONNECT_BACKOFF_MS", defaults::CONNECT_BACKOFF_MS),
            loop_delay: env_get_micros("NETKIT_LOOP_DELAY_US", defaults::LOOP_DELAY_US),
            name_prefix: env_get_str("NETKIT_REACTOR_NAME", defaults::NAME_PREFIX),
        }
    }

    /// Create config with explicit defaults (no env override).
    pub fn new() -> Self {
        Self {
            poll_timeout: Duration::from_millis(defaults::POLL_TIMEOUT_MS),
            max_events: defaults::MAX_EVENTS,
            read_buffer: defaults::READ_BUFFER,
            backlog: defaults::BACKLOG,
            outbox_capacity: defaults::OUTBOX_CAPACITY,
            settle_delay: Duration::from_millis(defaults::SETTLE_MS),
            connect_attempts: defaults::CONNECT_ATTEMPTS,
            connect_backoff: Duration::from_millis(defaults::CONNECT_BACKOFF_MS),
            loop_delay: Duration::from_micros(defaults::LOOP_DELAY_US),
            name_prefix: defaults::NAME_PREFIX.to_string(),
        }
    }

    // Builder methods

    pub fn poll_timeout(mut self, d: Duration) -> Self {
        self.poll_timeout = d;
        self
    }

    pub fn max_events(mut self, n: usize) -> Self {
        self.max_events = n;
        self
    }

    pub fn read_buffer(mut self, size: usize) -> Self {
        self.read_buffer = size;
        self
    }

    pub fn backlog(mut self, n: i32) -> Self {
        self.backlog = n;
        self
    }

    pub fn outbox_capacity(mut self, n: usize) -> Self {
        self.outbox_capacity = n;
        self
    }

    pub fn settle_delay(mut self, d: Duration) -> Self {
        self.settle_delay = d;
        self
    }

    pub fn connect_attempts(mut self, n: usize) -> Self {
        self.connect_attempts = n;
        self
    }

    pub fn connect_backoff(mut self, d: Duration) -> Self {
        self.connect_backoff = d;
        self
    }

    pub fn loop_delay(mut self, d: Duration) -> Self {
        self.loop_delay = d;
        self
    }

    pub fn name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    /// Validate configuration and return errors if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.poll_timeout.is_zero() {
            return Err(NetError::Config("poll_timeout must be > 0"));
        }
        if self.poll_timeout > Duration::from_secs(60) {
            return Err(NetError::Config("poll_timeout must be <= 60s"));
        }
        if self.max_events == 0 {
            return Err(NetError::Config("max_events must be > 0"));
        }
        if self.read_buffer < 512 {
            return Err(NetError::Config("read_buffer must be >= 512"));
        }
        if self.backlog <= 0 {
            return Err(NetError::Config("backlog must be > 0"));
        }
        if self.outbox_capacity == 0 {
            return Err(NetError::Config("outbox_capacity must be > 0"));
        }
        if self.connect_attempts == 0 {
            return Err(NetError::Config("connect_attempts must be > 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(ReactorConfig::new().validate().is_ok());
        assert!(ReactorConfig::from_env().validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = ReactorConfig::new()
            .poll_timeout(Duration::from_millis(10))
            .read_buffer(8192)
            .settle_delay(Duration::ZERO)
            .name_prefix("edge");
        assert_eq!(config.poll_timeout, Duration::from_millis(10));
        assert_eq!(config.read_buffer, 8192);
        assert_eq!(config.settle_delay, Duration::ZERO);
        assert_eq!(config.name_prefix, "edge");
    }

    #[test]
    fn test_validation() {
        assert!(ReactorConfig::new().poll_timeout(Duration::ZERO).validate().is_err());
        assert!(ReactorConfig::new().max_events(0).validate().is_err());
        assert!(ReactorConfig::new().read_buffer(16).validate().is_err());
        assert!(ReactorConfig::new().backlog(0).validate().is_err());
        assert!(ReactorConfig::new().outbox_capacity(0).validate().is_err());
        assert!(ReactorConfig::new().connect_attempts(0).validate().is_err());
    }
}
