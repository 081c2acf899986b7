//! netkit pool echo server
//!
//! The reactor thread only accepts and reads. Every connect/data/eof event
//! is moved into a task on a thread pool; workers echo through the reactor
//! handle and keep a per-connection byte count in a key/value store.
//!
//! Usage:
//!     cargo build --release -p netkit-pool-echo
//!     ./target/release/netkit-pool-echo [addr] [workers]
//!
//! Environment:
//!     NETKIT_POOL_WORKERS=4         overridden by the [workers] argument
//!     NETKIT_LOG_LEVEL=info

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use netkit::{
    kdebug, kerror, kinfo, signal, stderr_log, ConnectionEvent, EventKind, KvStore, LogSink, MemoryStore, NetError,
    PoolConfig, PoolServer, ReactorConfig, ReactorHandle, Result, ThreadPool,
};

const DEFAULT_ADDR: &str = "0.0.0.0:9998";

fn key(fd: i32) -> String {
    format!("conn:{}:bytes", fd)
}

/// Task body. Events for one fd may run on different workers, so the byte
/// count is best-effort under pipelined input.
fn on_event(store: &dyn KvStore, log: &dyn LogSink, handle: &ReactorHandle, ev: ConnectionEvent) {
    match ev.kind() {
        EventKind::Connect => {
            store.set(&key(ev.fd), "0".to_string());
            kdebug!(log, "pool-echo: fd {} connected", ev.fd);
        }
        EventKind::Data => {
            let seen: u64 = store.get(&key(ev.fd)).and_then(|v| v.parse().ok()).unwrap_or(0);
            store.set(&key(ev.fd), (seen + ev.payload.len() as u64).to_string());
            if let Err(e) = handle.send(ev.fd, ev.payload) {
                kerror!(log, "pool-echo: fd {}: reply dropped: {}", ev.fd, e);
            }
        }
        EventKind::Eof => {
            let total = store.get(&key(ev.fd)).unwrap_or_else(|| "0".to_string());
            store.remove(&key(ev.fd));
            kdebug!(log, "pool-echo: fd {} closed after {} bytes", ev.fd, total);
        }
    }
}

fn run() -> Result<()> {
    let log = stderr_log();
    let mut args = std::env::args().skip(1);
    let addr: SocketAddr = args
        .next()
        .unwrap_or_else(|| DEFAULT_ADDR.to_string())
        .parse()
        .map_err(|_| NetError::Config("address must be host:port"))?;

    let mut pool_config = PoolConfig::from_env().name_prefix("pool-echo");
    if let Some(n) = args.next() {
        let n = n.parse().map_err(|_| NetError::Config("workers must be a number"))?;
        pool_config = pool_config.workers(n);
    }

    signal::install()?;

    let pool = Arc::new(ThreadPool::new(pool_config, log.clone())?);
    let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());

    let app_store = Arc::clone(&store);
    let app_log = Arc::clone(&log);
    let mut server = PoolServer::start(addr, ReactorConfig::from_env(), Arc::clone(&pool), log.clone(), move |handle, ev| {
        on_event(&*app_store, &*app_log, handle, ev)
    })?;
    kinfo!(
        log,
        "pool-echo: listening on {} with {} workers (Ctrl-C to stop)",
        server.local_addr(),
        pool.workers()
    );

    let stats = server.stats().clone();
    let status_pool = Arc::clone(&pool);
    signal::wait(Duration::from_secs(5), || {
        kinfo!(
            log,
            "pool-echo: {} pending={} completed={}",
            stats.snapshot(),
            status_pool.pending(),
            status_pool.total_completed()
        );
    });

    kinfo!(log, "pool-echo: shutting down...");
    server.stop();
    if !pool.wait_all_timeout(Duration::from_secs(2)) {
        kinfo!(log, "pool-echo: {} tasks still queued at exit", pool.pending());
    }
    kinfo!(log, "pool-echo: done. per-worker {:?}", pool.completed_per_worker());
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        let log = stderr_log();
        kerror!(log, "pool-echo: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netkit::NullSink;

    #[test]
    fn test_store_tracks_and_forgets_connection() {
        let store = MemoryStore::new();
        let log = NullSink;
        // fd 7 is not registered with this reactor; its replies are dropped there.
        let pool = ThreadPool::new(PoolConfig::new().workers(1), Arc::new(NullSink)).unwrap();
        let server = PoolServer::start(
            "127.0.0.1:0".parse().unwrap(),
            ReactorConfig::new(),
            Arc::new(pool),
            Arc::new(NullSink),
            |_, _| {},
        )
        .unwrap();
        let handle = server.handle().clone();

        on_event(&store, &log, &handle, ConnectionEvent::connected(7));
        assert_eq!(store.get(&key(7)).as_deref(), Some("0"));
        on_event(&store, &log, &handle, ConnectionEvent::data(7, b"abcd".to_vec()));
        on_event(&store, &log, &handle, ConnectionEvent::data(7, b"ef".to_vec()));
        assert_eq!(store.get(&key(7)).as_deref(), Some("6"));
        on_event(&store, &log, &handle, ConnectionEvent::eof(7));
        assert!(store.get(&key(7)).is_none());
        assert!(store.is_empty());
    }
}
