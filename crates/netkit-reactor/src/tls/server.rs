//! TLS server and client on top of the reactor.
//!
//! Each connection gets a `TlsSession` living on the reactor thread.
//! `ReactorHandle::send` carries cleartext; the handler feeds it into the
//! owning session. `ReactorHandle::close` sends close_notify and closes the
//! socket once the alert has been written.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ServerConfig};

use netkit_core::error::Result;
use netkit_core::log::LogSink;
use netkit_core::{kdebug, kwarn};

use crate::client::ClientCore;
use crate::config::ReactorConfig;
use crate::outbox::ReactorHandle;
use crate::reactor::{CloseReason, Connection, Disposition, Endpoint, Handler, Reactor};
use crate::stats::ReactorStats;

use super::session::{PumpStatus, TlsCallback, TlsSession, TlsState};

enum SessionFactory {
    Server(Arc<ServerConfig>),
    Client(Arc<ClientConfig>, ServerName<'static>),
}

impl SessionFactory {
    fn create(&self, fd: RawFd) -> Result<TlsSession> {
        match self {
            Self::Server(config) => TlsSession::new_server(fd, Arc::clone(config)),
            Self::Client(config, name) => TlsSession::new_client(fd, Arc::clone(config), name.clone()),
        }
    }
}

pub(crate) struct TlsHandler {
    name: String,
    factory: SessionFactory,
    sessions: HashMap<RawFd, TlsSession>,
    on_recv: TlsCallback,
    log: Arc<dyn LogSink>,
}

impl TlsHandler {
    fn new(name: String, factory: SessionFactory, on_recv: TlsCallback, log: Arc<dyn LogSink>) -> Self {
        Self {
            name,
            factory,
            sessions: HashMap::new(),
            on_recv,
            log,
        }
    }

    /// Write what the session has; close once a shutdown has drained.
    fn flush(session: &mut TlsSession, conn: &mut Connection) -> Disposition {
        match session.flush_to(conn) {
            Ok(true) if session.state() == TlsState::ShuttingDown => Disposition::Closed(CloseReason::Local),
            Ok(_) => Disposition::Open,
            Err(e) => Disposition::Failed(e),
        }
    }
}

impl Handler for TlsHandler {
    fn on_open(&mut self, conn: &mut Connection) -> Disposition {
        let fd = conn.fd();
        let mut session = match self.factory.create(fd) {
            Ok(s) => s,
            Err(e) => return Disposition::Failed(io::Error::new(io::ErrorKind::Other, e.to_string())),
        };
        // A client session has its ClientHello ready.
        let disp = Self::flush(&mut session, conn);
        self.sessions.insert(fd, session);
        disp
    }

    fn on_readable(&mut self, conn: &mut Connection, buf: &mut [u8]) -> Disposition {
        let Some(session) = self.sessions.get_mut(&conn.fd()) else {
            return Disposition::Closed(CloseReason::Error);
        };
        let was_handshaking = session.state() == TlsState::Handshaking;
        match session.service(conn, buf, &mut *self.on_recv) {
            Ok(PumpStatus::PeerClosed) => Disposition::Closed(CloseReason::Eof),
            Ok(PumpStatus::Open) => {
                if was_handshaking && session.is_established() {
                    kdebug!(self.log, "{}: fd {} handshake complete ({:?})", self.name, conn.fd(), session.role());
                }
                if session.state() == TlsState::ShuttingDown && !session.wants_write() {
                    return Disposition::Closed(CloseReason::Local);
                }
                Disposition::Open
            }
            Err(e) => Disposition::Failed(e),
        }
    }

    fn on_writable(&mut self, conn: &mut Connection, buf: &mut [u8]) -> Disposition {
        let paused = match self.sessions.get(&conn.fd()) {
            Some(session) => session.read_paused(),
            None => return Disposition::Closed(CloseReason::Error),
        };
        if paused {
            // Edge-triggered: the input left unread will not raise EPOLLIN again.
            return self.on_readable(conn, buf);
        }
        match self.sessions.get_mut(&conn.fd()) {
            Some(session) => Self::flush(session, conn),
            None => Disposition::Closed(CloseReason::Error),
        }
    }

    fn on_send(&mut self, conn: &mut Connection, bytes: Vec<u8>) -> Disposition {
        let Some(session) = self.sessions.get_mut(&conn.fd()) else {
            return Disposition::Closed(CloseReason::Error);
        };
        if let Err(e) = session.send(&bytes) {
            kwarn!(self.log, "{}: fd {}: dropped {} bytes: {}", self.name, conn.fd(), bytes.len(), e);
            return Disposition::Open;
        }
        Self::flush(session, conn)
    }

    fn on_close_request(&mut self, conn: &mut Connection) -> Disposition {
        match self.sessions.get_mut(&conn.fd()) {
            Some(session) => {
                session.close();
                Self::flush(session, conn)
            }
            None => Disposition::Closed(CloseReason::Local),
        }
    }

    fn wants_write(&self, conn: &Connection) -> bool {
        self.sessions
            .get(&conn.fd())
            .map(|s| s.wants_write())
            .unwrap_or(false)
    }

    fn on_close(&mut self, fd: RawFd, reason: CloseReason) {
        if let Some(mut session) = self.sessions.remove(&fd) {
            session.mark_closed();
            kdebug!(self.log, "{}: fd {} session closed ({:?})", self.name, fd, reason);
        }
    }
}

/// Accepting reactor with one server-role TLS session per connection.
pub struct TlsServer {
    reactor: Reactor<TlsHandler>,
}

impl TlsServer {
    pub fn start<F>(
        addr: SocketAddr,
        config: ReactorConfig,
        tls: Arc<ServerConfig>,
        log: Arc<dyn LogSink>,
        on_recv: F,
    ) -> Result<Self>
    where
        F: FnMut(&mut TlsSession, &[u8]) + Send + 'static,
    {
        let name = format!("{}-tls", config.name_prefix);
        let handler_name = name.clone();
        let handler_log = Arc::clone(&log);
        let reactor = Reactor::start(name, Endpoint::Listen(addr), config, log, move |_| {
            TlsHandler::new(handler_name, SessionFactory::Server(tls), Box::new(on_recv), handler_log)
        })?;
        Ok(Self { reactor })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.reactor.local_addr()
    }

    /// Cleartext sends and close_notify for any session.
    pub fn handle(&self) -> &ReactorHandle {
        self.reactor.handle()
    }

    pub fn stats(&self) -> &Arc<ReactorStats> {
        self.reactor.stats()
    }

    pub fn is_running(&self) -> bool {
        self.reactor.is_running()
    }

    pub fn stop(&mut self) {
        self.reactor.stop();
    }
}

/// Client-role TLS session over one connected socket.
///
/// `send` may be called before the handshake finishes; the engine holds the
/// cleartext back until it can be encrypted for the peer.
pub struct TlsClient {
    core: ClientCore<TlsHandler>,
}

impl TlsClient {
    pub fn connect<F>(
        peer: SocketAddr,
        config: ReactorConfig,
        tls: Arc<ClientConfig>,
        server_name: ServerName<'static>,
        log: Arc<dyn LogSink>,
        on_recv: F,
    ) -> Result<Self>
    where
        F: FnMut(&mut TlsSession, &[u8]) + Send + 'static,
    {
        let name = format!("{}-tls-rx", config.name_prefix);
        let handler_log = Arc::clone(&log);
        let core = ClientCore::connect(peer, config, log, move |_| {
            TlsHandler::new(name, SessionFactory::Client(tls, server_name), Box::new(on_recv), handler_log)
        })?;
        Ok(Self { core })
    }

    /// Queue cleartext for the server.
    pub fn send(&self, bytes: impl Into<Vec<u8>>) -> Result<()> {
        self.core.send(bytes.into())
    }

    /// Send close_notify, then close the socket.
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

    pub fn stop(&mut self) {
        self.core.stop();
    }
}
