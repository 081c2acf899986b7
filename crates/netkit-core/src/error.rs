//! Error types for netkit
//!
//! Only setup-time failures reach a component's caller. Transient
//! conditions (EINTR, would-block) never become a `NetError`; per-connection
//! and per-session failures are logged and handled inside the reactor loop.

use std::fmt;
use std::io;

/// Result type for netkit operations
pub type Result<T> = std::result::Result<T, NetError>;

/// Errors that can occur in netkit operations
#[derive(Debug)]
pub enum NetError {
    /// A system call failed. `op` names the call ("bind", "epoll_create1", ...).
    Os { op: &'static str, source: io::Error },

    /// Failed to spawn an OS thread.
    Spawn(io::Error),

    /// A worker's `setup()` refused to start.
    SetupFailed(String),

    /// Bounded queue is full; the caller may retry.
    QueueFull,

    /// The component is not running (never started or already stopped).
    NotRunning,

    /// The connection or session is gone.
    Closed,

    /// TLS engine or TLS configuration error.
    Tls(String),

    /// Invalid configuration value.
    Config(&'static str),
}

impl NetError {
    /// Wrap an `io::Error` with the name of the failing call.
    pub fn os(op: &'static str, source: io::Error) -> Self {
        NetError::Os { op, source }
    }

    /// Wrap the calling thread's current errno.
    pub fn last_os(op: &'static str) -> Self {
        NetError::Os { op, source: io::Error::last_os_error() }
    }

    /// Raw errno, when the error came from the OS.
    pub fn errno(&self) -> Option<i32> {
        match self {
            NetError::Os { source, .. } | NetError::Spawn(source) => source.raw_os_error(),
            _ => None,
        }
    }
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetError::Os { op, source } => match source.raw_os_error() {
                Some(errno) => write!(f, "{} failed: {} (errno {})", op, source, errno),
                None => write!(f, "{} failed: {}", op, source),
            },
            NetError::Spawn(e) => write!(f, "failed to spawn thread: {}", e),
            NetError::SetupFailed(msg) => write!(f, "setup failed: {}", msg),
            NetError::QueueFull => write!(f, "queue full"),
            NetError::NotRunning => write!(f, "not running"),
            NetError::Closed => write!(f, "connection closed"),
            NetError::Tls(msg) => write!(f, "tls: {}", msg),
            NetError::Config(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for NetError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NetError::Os { source, .. } | NetError::Spawn(source) => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for NetError {
    fn from(e: io::Error) -> Self {
        NetError::Os { op: "io", source: e }
    }
}

impl From<nix::errno::Errno> for NetError {
    fn from(e: nix::errno::Errno) -> Self {
        NetError::Os { op: "syscall", source: io::Error::from(e) }
    }
}
