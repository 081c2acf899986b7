//! netkit echo server (inline reactor)
//!
//! One reactor thread accepts, reads and echoes every connection. Replies
//! go through the reactor's own handle, so they are written on the next
//! loop iteration.
//!
//! Usage:
//!     cargo build --release -p netkit-echo
//!     ./target/release/netkit-echo [addr]          # default 0.0.0.0:9999
//!
//! Test with:
//!     echo "hello" | nc -q1 localhost 9999
//!
//! Environment:
//!     NETKIT_LOG_LEVEL=debug        per-connection open/close lines
//!     NETKIT_POLL_TIMEOUT_MS=100    epoll_wait bound (stop latency)

use std::net::SocketAddr;
use std::time::Duration;

use netkit::{kerror, kinfo, signal, stderr_log, InlineServer, NetError, ReactorConfig, Result};

const DEFAULT_ADDR: &str = "0.0.0.0:9999";

fn run() -> Result<()> {
    let log = stderr_log();
    let addr: SocketAddr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_ADDR.to_string())
        .parse()
        .map_err(|_| NetError::Config("address must be host:port"))?;

    signal::install()?;

    let mut server = InlineServer::start_with(addr, ReactorConfig::from_env(), log.clone(), |handle| {
        move |fd, bytes: &[u8]| {
            // A full outbox only drops this chunk.
            let _ = handle.send(fd, bytes.to_vec());
        }
    })?;
    kinfo!(log, "echo: listening on {} (Ctrl-C to stop)", server.local_addr());

    let stats = server.stats().clone();
    signal::wait(Duration::from_secs(5), || {
        kinfo!(log, "echo: {}", stats.snapshot());
    });

    kinfo!(log, "echo: shutting down...");
    server.stop();
    kinfo!(log, "echo: done. {}", stats.snapshot());
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        let log = stderr_log();
        kerror!(log, "echo: {}", e);
        std::process::exit(1);
    }
}
