//! Accepting servers: inline and pool-backed.
//!
//! Both bind during setup, accept in a loop and read every connection
//! until it would block. The inline server calls the receive callback on
//! the reactor thread; the pool server moves each `ConnectionEvent` into a
//! task on a `ThreadPool`.

use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::sync::Arc;

use netkit_core::error::Result;
use netkit_core::event::ConnectionEvent;
use netkit_core::log::LogSink;
use netkit_core::kwarn;
use netkit_runtime::pool::ThreadPool;

use crate::config::ReactorConfig;
use crate::outbox::ReactorHandle;
use crate::reactor::{read_until_blocked, CloseReason, Connection, Disposition, Endpoint, Handler, Reactor};
use crate::stats::ReactorStats;

/// Inline receive callback: `(fd, bytes)` on the reactor thread.
pub type RecvCallback = Box<dyn FnMut(RawFd, &[u8]) + Send + 'static>;

/// Pool receive callback, run inside a pool task.
pub type PoolCallback = Arc<dyn Fn(&ReactorHandle, ConnectionEvent) + Send + Sync + 'static>;

pub(crate) struct InlineHandler {
    on_recv: RecvCallback,
}

impl InlineHandler {
    pub(crate) fn new(on_recv: RecvCallback) -> Self {
        Self { on_recv }
    }
}

impl Handler for InlineHandler {
    fn on_readable(&mut self, conn: &mut Connection, buf: &mut [u8]) -> Disposition {
        let on_recv = &mut self.on_recv;
        read_until_blocked(conn, buf, |conn, bytes| on_recv(conn.fd(), bytes))
    }
}

pub(crate) struct PoolHandler {
    name: String,
    pool: Arc<ThreadPool>,
    app: PoolCallback,
    handle: ReactorHandle,
    log: Arc<dyn LogSink>,
}

impl PoolHandler {
    pub(crate) fn new(
        name: String,
        pool: Arc<ThreadPool>,
        app: PoolCallback,
        handle: ReactorHandle,
        log: Arc<dyn LogSink>,
    ) -> Self {
        Self { name, pool, app, handle, log }
    }

    /// Move `event` into a pool task.
    fn submit(&self, event: ConnectionEvent) {
        let app = Arc::clone(&self.app);
        let handle = self.handle.clone();
        let fd = event.fd;
        let kind = event.kind();
        if let Err(e) = self.pool.submit(move || app(&handle, event)) {
            kwarn!(self.log, "{}: {:?} event for fd {} dropped: {}", self.name, kind, fd, e);
        }
    }
}

impl Handler for PoolHandler {
    fn on_open(&mut self, conn: &mut Connection) -> Disposition {
        self.submit(ConnectionEvent::connected(conn.fd()));
        Disposition::Open
    }

    fn on_readable(&mut self, conn: &mut Connection, buf: &mut [u8]) -> Disposition {
        read_until_blocked(conn, buf, |conn, bytes| {
            self.submit(ConnectionEvent::data(conn.fd(), bytes.to_vec()))
        })
    }

    fn on_close(&mut self, fd: RawFd, reason: CloseReason) {
        // Connections torn down by the reactor's own stop get no eof.
        if reason != CloseReason::Shutdown {
            self.submit(ConnectionEvent::eof(fd));
        }
    }
}

/// Listening reactor delivering bytes inline.
pub struct InlineServer {
    reactor: Reactor<InlineHandler>,
}

impl InlineServer {
    /// Bind `addr` and start servicing. Returns once the listener is up.
    pub fn start<F>(addr: SocketAddr, config: ReactorConfig, log: Arc<dyn LogSink>, on_recv: F) -> Result<Self>
    where
        F: FnMut(RawFd, &[u8]) + Send + 'static,
    {
        Self::start_with(addr, config, log, move |_| on_recv)
    }

    /// Like `start`, but builds the callback from the server's own handle
    /// so it can reply.
    pub fn start_with<F, M>(addr: SocketAddr, config: ReactorConfig, log: Arc<dyn LogSink>, make: M) -> Result<Self>
    where
        F: FnMut(RawFd, &[u8]) + Send + 'static,
        M: FnOnce(ReactorHandle) -> F,
    {
        let name = format!("{}-srv", config.name_prefix);
        let reactor = Reactor::start(name, Endpoint::Listen(addr), config, log, |handle| {
            InlineHandler::new(Box::new(make(handle)))
        })?;
        Ok(Self { reactor })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.reactor.local_addr()
    }

    pub fn handle(&self) -> &ReactorHandle {
        self.reactor.handle()
    }

    pub fn stats(&self) -> &Arc<ReactorStats> {
        self.reactor.stats()
    }

    pub fn is_running(&self) -> bool {
        self.reactor.is_running()
    }

    /// Stop the reactor, closing the listener and every connection.
    pub fn stop(&mut self) {
        self.reactor.stop();
    }
}

/// Listening reactor handing connection events to a thread pool.
///
/// Per fd, events are submitted in order (connect, data..., eof) and
/// exactly one eof is submitted for every connection that ends while the
/// server runs. Workers may run events for the same fd concurrently.
pub struct PoolServer {
    reactor: Reactor<PoolHandler>,
    pool: Arc<ThreadPool>,
}

impl PoolServer {
    pub fn start<F>(
        addr: SocketAddr,
        config: ReactorConfig,
        pool: Arc<ThreadPool>,
        log: Arc<dyn LogSink>,
        app: F,
    ) -> Result<Self>
    where
        F: Fn(&ReactorHandle, ConnectionEvent) + Send + Sync + 'static,
    {
        let name = format!("{}-srv", config.name_prefix);
        let app: PoolCallback = Arc::new(app);
        let handler_pool = Arc::clone(&pool);
        let handler_log = Arc::clone(&log);
        let handler_name = name.clone();
        let reactor = Reactor::start(name, Endpoint::Listen(addr), config, log, move |handle| {
            PoolHandler::new(handler_name, handler_pool, app, handle, handler_log)
        })?;
        Ok(Self { reactor, pool })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.reactor.local_addr()
    }

    pub fn handle(&self) -> &ReactorHandle {
        self.reactor.handle()
    }

    pub fn stats(&self) -> &Arc<ReactorStats> {
        self.reactor.stats()
    }

    pub fn pool(&self) -> &Arc<ThreadPool> {
        &self.pool
    }

    pub fn is_running(&self) -> bool {
        self.reactor.is_running()
    }

    /// Stop the reactor. Events already queued on the pool still run.
    pub fn stop(&mut self) {
        self.reactor.stop();
    }
}
