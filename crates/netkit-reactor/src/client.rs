//! Connected clients: one socket serviced by a receive ("rx") reactor.
//!
//! The rx reactor connects during setup, so `connect` returns with the
//! socket registered and inbound bytes already flowing. Sends go through
//! the reactor's outbox; the first one waits out the settle delay.

use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use netkit_core::error::{NetError, Result};
use netkit_core::event::ConnectionEvent;
use netkit_core::log::LogSink;
use netkit_runtime::pool::ThreadPool;

use crate::config::ReactorConfig;
use crate::outbox::ReactorHandle;
use crate::reactor::{Endpoint, Handler, Reactor};
use crate::server::{InlineHandler, PoolCallback, PoolHandler};
use crate::stats::ReactorStats;

/// State common to every client flavor.
pub(crate) struct ClientCore<H: Handler> {
    reactor: Reactor<H>,
    fd: RawFd,
    peer: SocketAddr,
    ready_at: Instant,
}

impl<H: Handler> ClientCore<H> {
    pub(crate) fn connect<F>(
        peer: SocketAddr,
        config: ReactorConfig,
        log: Arc<dyn LogSink>,
        make_handler: F,
    ) -> Result<Self>
    where
        F: FnOnce(ReactorHandle) -> H,
    {
        let name = format!("{}-rx", config.name_prefix);
        let settle = config.settle_delay;
        let reactor = Reactor::start(name.clone(), Endpoint::Connect(peer), config, log, make_handler)?;
        let fd = reactor
            .peer_fd()
            .ok_or_else(|| NetError::SetupFailed(format!("{}: no connected fd", name)))?;
        Ok(Self {
            reactor,
            fd,
            peer,
            ready_at: Instant::now() + settle,
        })
    }

    fn settle(&self) {
        let now = Instant::now();
        if now < self.ready_at {
            thread::sleep(self.ready_at - now);
        }
    }

    pub(crate) fn send(&self, bytes: Vec<u8>) -> Result<()> {
        if !self.is_open() {
            return Err(NetError::Closed);
        }
        self.settle();
        self.reactor.handle().send(self.fd, bytes)
    }

    pub(crate) fn is_open(&self) -> bool {
        self.reactor.is_running() && self.reactor.stats().snapshot().open > 0
    }

    pub(crate) fn close(&self) -> Result<()> {
        self.reactor.handle().close(self.fd)
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.fd
    }

    pub(crate) fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.reactor.local_addr()
    }

    pub(crate) fn handle(&self) -> &ReactorHandle {
        self.reactor.handle()
    }

    pub(crate) fn stats(&self) -> &Arc<ReactorStats> {
        self.reactor.stats()
    }

    pub(crate) fn stop(&mut self) {
        self.reactor.stop();
    }

    /// Block until the peer or a local close has ended the connection.
    pub(crate) fn wait_closed(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.is_open() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        true
    }
}

macro_rules! client_accessors {
    () => {
        /// Queue bytes for the server.
        ///
        /// Blocks for the remainder of the settle delay on the first calls
        /// after `connect`.
        pub fn send(&self, bytes: impl Into<Vec<u8>>) -> Result<()> {
            self.core.send(bytes.into())
        }

        /// Close the connection from our side. The rx reactor keeps running
        /// until `stop`.
        pub fn close(&self) -> Result<()> {
            self.core.close()
        }

        pub fn is_open(&self) -> bool {
            self.core.is_open()
        }

        pub fn wait_closed(&self, timeout: Duration) -> bool {
            self.core.wait_closed(timeout)
        }

        pub fn fd(&self) -> RawFd {
            self.core.fd()
        }

        pub fn peer(&self) -> SocketAddr {
            self.core.peer()
        }

        pub fn local_addr(&self) -> SocketAddr {
            self.core.local_addr()
        }

        pub fn handle(&self) -> &ReactorHandle {
            self.core.handle()
        }

        pub fn stats(&self) -> &Arc<ReactorStats> {
            self.core.stats()
        }

        /// Stop the rx reactor and close the socket.
        pub fn stop(&mut self) {
            self.core.stop();
        }
    };
}

/// Client whose inbound bytes are delivered on the rx thread.
pub struct InlineClient {
    core: ClientCore<InlineHandler>,
}

impl InlineClient {
    pub fn connect<F>(peer: SocketAddr, config: ReactorConfig, log: Arc<dyn LogSink>, on_recv: F) -> Result<Self>
    where
        F: FnMut(RawFd, &[u8]) + Send + 'static,
    {
        let core = ClientCore::connect(peer, config, log, move |_| InlineHandler::new(Box::new(on_recv)))?;
        Ok(Self { core })
    }

    client_accessors!();
}

impl std::fmt::Debug for InlineClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InlineClient")
            .field("fd", &self.core.fd)
            .field("peer", &self.core.peer)
            .finish_non_exhaustive()
    }
}

/// Client whose inbound events run on a thread pool.
///
/// The pool sees a connect event first and an eof event if the server
/// closes or the connection fails.
pub struct PoolClient {
    core: ClientCore<PoolHandler>,
    pool: Arc<ThreadPool>,
}

impl PoolClient {
    pub fn connect<F>(
        peer: SocketAddr,
        config: ReactorConfig,
        pool: Arc<ThreadPool>,
        log: Arc<dyn LogSink>,
        app: F,
    ) -> Result<Self>
    where
        F: Fn(&ReactorHandle, ConnectionEvent) + Send + Sync + 'static,
    {
        let name = format!("{}-rx", config.name_prefix);
        let app: PoolCallback = Arc::new(app);
        let handler_pool = Arc::clone(&pool);
        let handler_log = Arc::clone(&log);
        let core = ClientCore::connect(peer, config, log, move |handle| {
            PoolHandler::new(name, handler_pool, app, handle, handler_log)
        })?;
        Ok(Self { core, pool })
    }

    pub fn pool(&self) -> &Arc<ThreadPool> {
        &self.pool
    }

    client_accessors!();
}
