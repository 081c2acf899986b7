//! # netkit-reactor - epoll reactors and a TLS record pump
//!
//! Every reactor runs on one `ManagedThread` and owns an epoll set, its
//! sockets, and an outbox for replies coming from other threads.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │  Application / pool workers                                │
//! │    ReactorHandle::send(fd, bytes)   ReactorHandle::close() │
//! └──────────────┬─────────────────────────────────────────────┘
//!                │ ArrayQueue<Outbound> + eventfd wake
//!                ▼
//! ┌────────────────────────────────────────────────────────────┐
//! │  Reactor thread (ManagedThread)                            │
//! │    epoll_wait(timeout) → accept / read-until-EAGAIN        │
//! │    Handler: inline callback | pool submit | TLS pump       │
//! └──────────────┬─────────────────────────────────────────────┘
//!                │ ConnectionEvent (pool variant only)
//!                ▼
//! ┌────────────────────────────────────────────────────────────┐
//! │  ThreadPool workers run the application callback           │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Flavors
//!
//! | Type           | Socket     | Delivery                                   |
//! |----------------|------------|--------------------------------------------|
//! | `InlineServer` | listener   | `FnMut(fd, &[u8])` on the reactor thread   |
//! | `PoolServer`   | listener   | `ConnectionEvent` task on a `ThreadPool`   |
//! | `InlineClient` | connected  | `FnMut(fd, &[u8])` on the rx thread        |
//! | `PoolClient`   | connected  | `ConnectionEvent` task on a `ThreadPool`   |
//! | `TlsServer`    | listener   | `FnMut(&mut TlsSession, &[u8])` cleartext  |
//! | `TlsClient`    | connected  | `FnMut(&mut TlsSession, &[u8])` cleartext  |

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        pub mod config;
        pub mod sys;
        pub mod poller;
        pub mod notifier;
        pub mod outbox;
        pub mod stats;
        pub(crate) mod reactor;
        pub mod server;
        pub mod client;
        pub mod tls;

        pub use config::ReactorConfig;
        pub use outbox::ReactorHandle;
        pub use stats::{ReactorStats, StatsSnapshot};
        pub use server::{InlineServer, PoolServer, PoolCallback, RecvCallback};
        pub use client::{InlineClient, PoolClient};
        pub use tls::{Role, TlsClient, TlsServer, TlsSession, TlsState};
    } else {
        compile_error!("netkit-reactor requires Linux (epoll + eventfd)");
    }
}
