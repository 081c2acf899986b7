//! # netkit - threads, pools and epoll reactors
//!
//! Single import for the netkit crates.
//!
//! ## Features
//!
//! - **Managed threads**: `setup → process* → cleanup` with cooperative stop
//! - **Work queue**: two-sided FIFO, producers and consumers lock different sides
//! - **Thread pool**: fixed workers, `submit`/`submit_with`, `wait_all`
//! - **Reactors**: epoll servers and clients, inline or pool-backed delivery
//! - **TLS**: rustls session pumped through memory buffers on the reactor thread
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use netkit::{InlineServer, ReactorConfig, StderrSink, LogSink};
//!
//! let log: Arc<dyn LogSink> = Arc::new(StderrSink::from_env());
//! let addr = "127.0.0.1:9999".parse().unwrap();
//! let mut server = InlineServer::start_with(addr, ReactorConfig::default(), log, |handle| {
//!     move |fd, bytes: &[u8]| {
//!         let _ = handle.send(fd, bytes.to_vec());
//!     }
//! })?;
//! // ...
//! server.stop();
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Application                            │
//! │        receive callbacks, ReactorHandle::send/close         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 netkit-reactor                              │
//! │   epoll loop, accept/read, outbox, TLS session pump         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 netkit-runtime                              │
//! │      ManagedThread, WorkQueue, ThreadPool                   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 netkit-core                                 │
//! │   LogSink, NetError, SpinLock, KvStore, ConnectionEvent     │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod signal;

// Re-export core types
pub use netkit_core::{
    ConnectionEvent,
    EventKind,
    KvStore,
    MemoryStore,
    NetError,
    Result,
    SpinLock,
};

// Re-export logging
pub use netkit_core::{kerror, kwarn, kinfo, kdebug, ktrace};
pub use netkit_core::log::{LogLevel, LogSink, MemorySink, NullSink, StderrSink};

// Re-export env utilities
pub use netkit_core::{env_get, env_get_bool, env_get_opt, env_get_str, env_is_set};

// Re-export runtime types
pub use netkit_runtime::{
    ManagedThread,
    PoolConfig,
    Task,
    TaskStatus,
    ThreadContext,
    ThreadPool,
    ThreadState,
    WorkQueue,
    Worker,
};

// Re-export reactor types
pub use netkit_reactor::{
    InlineClient,
    InlineServer,
    PoolCallback,
    PoolClient,
    PoolServer,
    ReactorConfig,
    ReactorHandle,
    ReactorStats,
    RecvCallback,
    StatsSnapshot,
};

/// TLS session, server/client and rustls configuration helpers.
pub mod tls {
    pub use netkit_reactor::tls::*;
    pub use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName};
    pub use rustls::{ClientConfig, ServerConfig};
}

use std::sync::Arc;

/// Stderr logger configured from `NETKIT_LOG_LEVEL` / `NETKIT_FLUSH_EPRINT`.
pub fn stderr_log() -> Arc<dyn LogSink> {
    Arc::new(StderrSink::from_env())
}

/// Thread pool sized from `PoolConfig::from_env()`, ready to share between
/// reactors.
pub fn shared_pool(log: Arc<dyn LogSink>) -> Result<Arc<ThreadPool>> {
    Ok(Arc::new(ThreadPool::new(PoolConfig::from_env(), log)?))
}
