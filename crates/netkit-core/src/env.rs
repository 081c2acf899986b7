//! Environment variable utilities
//!
//! Config structs start from compile-time defaults and let `NETKIT_*`
//! variables override individual fields through these helpers.
//!
//! # Usage
//!
//! ```ignore
//! use netkit_core::env::{env_get, env_get_bool, env_get_millis};
//!
//! let workers: usize = env_get("NETKIT_POOL_WORKERS", 4);
//! let timeout = env_get_millis("NETKIT_POLL_TIMEOUT_MS", 100);
//! let flush = env_get_bool("NETKIT_FLUSH_EPRINT", false);
//! ```

use std::str::FromStr;
use std::time::Duration;

/// Get environment variable parsed as type T, or return default
///
/// Works with any type that implements `FromStr`. A value that fails to
/// parse is treated as unset.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Get environment variable as boolean
///
/// Accepts: "1", "true", "yes", "on" (case-insensitive) as true.
/// Any other value is false; unset returns the default.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// Get environment variable as optional value
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Get environment variable as string, or return default
#[inline]
pub fn env_get_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Check if environment variable is set (regardless of value)
#[inline]
pub fn env_is_set(key: &str) -> bool {
    std::env::var(key).is_ok()
}

/// Millisecond duration from the environment.
#[inline]
pub fn env_get_millis(key: &str, default_ms: u64) -> Duration {
    Duration::from_millis(env_get(key, default_ms))
}

/// Microsecond duration from the environment.
#[inline]
pub fn env_get_micros(key: &str, default_us: u64) -> Duration {
    Duration::from_micros(env_get(key, default_us))
}

// ============================================================================
// Tests
// ============================================================================
