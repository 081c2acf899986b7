//! Reactor core shared by every server and client flavor.
//!
//! A `ReactorWorker` is a `Worker` run by one `ManagedThread`. It owns the
//! epoll set, the listener (servers), every connection, and the receiving
//! end of the outbox. What happens to bytes is decided by a `Handler`.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::{Arc, OnceLock};

use netkit_core::error::{NetError, Result};
use netkit_core::log::LogSink;
use netkit_core::{kdebug, kerror, kinfo, ktrace, kwarn};
use netkit_runtime::thread::{ManagedThread, ThreadContext, Worker};

use crate::config::ReactorConfig;
use crate::outbox::{Outbound, Outbox, ReactorHandle};
use crate::poller::{Event, Events, Interest, Poller};
use crate::stats::ReactorStats;
use crate::sys;

const WAKER: u64 = u64::MAX;
const LISTENER: u64 = u64::MAX - 1;

/// What the reactor thread starts from.
pub(crate) enum Endpoint {
    /// Bind and listen here during setup.
    Listen(SocketAddr),
    /// Connect here during setup and service that one stream.
    Connect(SocketAddr),
}

/// What setup reports back to the starting thread.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Bound {
    pub(crate) local_addr: SocketAddr,
    /// The connected stream's fd, for `Endpoint::Connect`.
    pub(crate) fd: Option<RawFd>,
}

/// Why a connection left the reactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CloseReason {
    /// Peer closed its side.
    Eof,
    /// Read, write or protocol failure.
    Error,
    /// Closed on request through the handle.
    Local,
    /// Reactor stopping.
    Shutdown,
}

/// Outcome of a handler step.
#[derive(Debug)]
pub(crate) enum Disposition {
    Open,
    Closed(CloseReason),
    Failed(io::Error),
}

/// A connection owned by the reactor thread.
///
/// `Read`/`Write` go straight to the socket and update the stats.
/// `pending` holds plaintext that could not be written without blocking.
pub(crate) struct Connection {
    fd: RawFd,
    stream: TcpStream,
    pending: Vec<u8>,
    write_interest: bool,
    stats: Arc<ReactorStats>,
}

impl Connection {
    fn new(stream: TcpStream, stats: Arc<ReactorStats>) -> Self {
        Self {
            fd: stream.as_raw_fd(),
            stream,
            pending: Vec::new(),
            write_interest: false,
            stats,
        }
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.fd
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Write as much of `bytes` as the socket takes now and keep the rest.
    pub(crate) fn send_plain(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.pending.is_empty() {
            let n = write_nonblocking(self, bytes)?;
            if n < bytes.len() {
                self.pending.extend_from_slice(&bytes[n..]);
            }
        } else {
            self.pending.extend_from_slice(bytes);
            self.flush_pending()?;
        }
        Ok(())
    }

    /// Push buffered plaintext out. Stops quietly on would-block.
    pub(crate) fn flush_pending(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let pending = std::mem::take(&mut self.pending);
        let n = match write_nonblocking(self, &pending) {
            Ok(n) => n,
            Err(e) => {
                self.pending = pending;
                return Err(e);
            }
        };
        self.pending = pending;
        self.pending.drain(..n);
        Ok(())
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.stream.read(buf)?;
        if n > 0 {
            self.stats.on_read(n);
        }
        Ok(n)
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.stream.write(buf)?;
        self.stats.on_write(n);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

/// Write until done or would-block. Returns bytes written.
fn write_nonblocking<W: Write>(w: &mut W, bytes: &[u8]) -> io::Result<usize> {
    let mut off = 0;
    while off < bytes.len() {
        match w.write(&bytes[off..]) {
            Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
            Ok(n) => off += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => return Err(e),
        }
    }
    Ok(off)
}

/// Non-blocking read loop for edge-triggered sockets: read until the
/// socket would block, handing every non-empty chunk to `deliver`.
pub(crate) fn read_until_blocked<F>(conn: &mut Connection, buf: &mut [u8], mut deliver: F) -> Disposition
where
    F: FnMut(&mut Connection, &[u8]),
{
    loop {
        match conn.read(buf) {
            Ok(0) => return Disposition::Closed(CloseReason::Eof),
            Ok(n) => deliver(conn, &buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Disposition::Open,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Disposition::Failed(e),
        }
    }
}

/// Per-flavor behavior plugged into the reactor loop.
///
/// Every method runs on the reactor thread.
pub(crate) trait Handler: Send + 'static {
    /// A connection was accepted or adopted.
    fn on_open(&mut self, _conn: &mut Connection) -> Disposition {
        Disposition::Open
    }

    /// The socket is readable (or hung up). Read until it would block.
    fn on_readable(&mut self, conn: &mut Connection, buf: &mut [u8]) -> Disposition;

    /// The socket accepted more output after a would-block. `buf` is the
    /// read buffer, for handlers that paused reading on a full socket.
    fn on_writable(&mut self, conn: &mut Connection, _buf: &mut [u8]) -> Disposition {
        match conn.flush_pending() {
            Ok(()) => Disposition::Open,
            Err(e) => Disposition::Failed(e),
        }
    }

    /// `ReactorHandle::send` reached the reactor.
    fn on_send(&mut self, conn: &mut Connection, bytes: Vec<u8>) -> Disposition {
        match conn.send_plain(&bytes) {
            Ok(()) => Disposition::Open,
            Err(e) => Disposition::Failed(e),
        }
    }

    /// `ReactorHandle::close` reached the reactor.
    fn on_close_request(&mut self, _conn: &mut Connection) -> Disposition {
        Disposition::Closed(CloseReason::Local)
    }

    /// Whether the connection needs `EPOLLOUT`.
    fn wants_write(&self, conn: &Connection) -> bool {
        conn.has_pending()
    }

    /// The connection has been deregistered and closed.
    fn on_close(&mut self, _fd: RawFd, _reason: CloseReason) {}
}

pub(crate) struct ReactorWorker<H: Handler> {
    name: String,
    endpoint: Option<Endpoint>,
    config: ReactorConfig,
    handler: H,
    poller: Option<Poller>,
    events: Events,
    listener: Option<TcpListener>,
    conns: HashMap<RawFd, Connection>,
    outbox: Arc<Outbox>,
    stats: Arc<ReactorStats>,
    bound: Arc<OnceLock<Bound>>,
    buf: Vec<u8>,
    log: Arc<dyn LogSink>,
}

impl<H: Handler> ReactorWorker<H> {
    fn poller(&self) -> Result<&Poller> {
        self.poller.as_ref().ok_or(NetError::NotRunning)
    }

    fn accept_all(&mut self) {
        loop {
            let accepted = match &self.listener {
                Some(listener) => sys::accept_nonblocking(listener),
                None => return,
            };
            match accepted {
                Ok(stream) => {
                    self.stats.on_accept();
                    self.register(stream);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::ConnectionAborted => continue,
                Err(e) => {
                    kerror!(
                        self.log,
                        "{}: accept failed: {} (errno {})",
                        self.name,
                        e,
                        e.raw_os_error().unwrap_or(0)
                    );
                    self.stats.on_error();
                    break;
                }
            }
        }
    }

    /// Register a connected stream edge-triggered and tell the handler.
    fn register(&mut self, stream: TcpStream) {
        let fd = stream.as_raw_fd();
        let added = match &self.poller {
            Some(poller) => poller.add(fd, fd as u64, Interest::READABLE | Interest::EDGE),
            None => return,
        };
        if let Err(e) = added {
            kerror!(
                self.log,
                "{}: epoll add fd {} failed: {} (errno {})",
                self.name,
                fd,
                e,
                e.raw_os_error().unwrap_or(0)
            );
            self.stats.on_error();
            return;
        }

        self.stats.on_open();
        ktrace!(self.log, "{}: fd {} registered", self.name, fd);
        let mut conn = Connection::new(stream, Arc::clone(&self.stats));
        let disp = self.handler.on_open(&mut conn);
        self.conns.insert(fd, conn);
        self.settle(fd, disp);
    }

    fn dispatch(&mut self, ev: Event) {
        let fd = ev.token as RawFd;
        let Some(conn) = self.conns.get_mut(&fd) else {
            // Closed earlier in this batch.
            return;
        };

        let mut disp = Disposition::Open;
        if ev.is_readable() || ev.is_hangup() || ev.is_error() {
            disp = self.handler.on_readable(conn, &mut self.buf);
        }
        if matches!(disp, Disposition::Open) && ev.is_writable() {
            disp = self.handler.on_writable(conn, &mut self.buf);
        }
        self.settle(fd, disp);
    }

    fn settle(&mut self, fd: RawFd, disp: Disposition) {
        match disp {
            Disposition::Open => self.update_interest(fd),
            Disposition::Closed(reason) => self.close_conn(fd, reason),
            Disposition::Failed(e) => {
                kerror!(
                    self.log,
                    "{}: fd {}: {} (errno {})",
                    self.name,
                    fd,
                    e,
                    e.raw_os_error().unwrap_or(0)
                );
                self.stats.on_error();
                self.close_conn(fd, CloseReason::Error);
            }
        }
    }

    fn update_interest(&mut self, fd: RawFd) {
        let Some(conn) = self.conns.get_mut(&fd) else {
            return;
        };
        let wants = self.handler.wants_write(conn);
        if wants == conn.write_interest {
            return;
        }
        let mut interest = Interest::READABLE | Interest::EDGE;
        if wants {
            interest = interest | Interest::WRITABLE;
        }
        let res = match &self.poller {
            Some(poller) => poller.modify(fd, fd as u64, interest),
            None => return,
        };
        match res {
            Ok(()) => conn.write_interest = wants,
            Err(e) => self.settle(fd, Disposition::Failed(e)),
        }
    }

    fn close_conn(&mut self, fd: RawFd, reason: CloseReason) {
        let Some(conn) = self.conns.remove(&fd) else {
            return;
        };
        if let Some(poller) = &self.poller {
            let _ = poller.delete(fd);
        }
        drop(conn);
        self.stats.on_close();
        kdebug!(self.log, "{}: fd {} closed ({:?})", self.name, fd, reason);
        self.handler.on_close(fd, reason);
    }

    fn drain_outbox(&mut self) {
        // Bounded so a busy producer cannot starve the socket events.
        for _ in 0..self.outbox.capacity() {
            let Some(cmd) = self.outbox.pop() else {
                break;
            };
            let (fd, disp) = match cmd {
                Outbound::Send { fd, bytes } => match self.conns.get_mut(&fd) {
                    Some(conn) => (fd, self.handler.on_send(conn, bytes)),
                    None => {
                        kdebug!(
                            self.log,
                            "{}: dropped {} bytes for unknown fd {}",
                            self.name,
                            bytes.len(),
                            fd
                        );
                        continue;
                    }
                },
                Outbound::Close { fd } => match self.conns.get_mut(&fd) {
                    Some(conn) => (fd, self.handler.on_close_request(conn)),
                    None => {
                        kdebug!(self.log, "{}: close for unknown fd {} ignored", self.name, fd);
                        continue;
                    }
                },
            };
            self.settle(fd, disp);
        }
    }
}

impl<H: Handler> Worker for ReactorWorker<H> {
    fn setup(&mut self) -> Result<()> {
        let poller = Poller::new()?;
        poller
            .add(self.outbox.notifier().fd(), WAKER, Interest::READABLE)
            .map_err(|e| NetError::os("epoll_ctl(eventfd)", e))?;
        self.poller = Some(poller);

        match self.endpoint.take() {
            Some(Endpoint::Listen(addr)) => {
                let listener = sys::bind_listener(addr, self.config.backlog)?;
                let local = listener
                    .local_addr()
                    .map_err(|e| NetError::os("getsockname", e))?;
                self.poller()?
                    .add(listener.as_raw_fd(), LISTENER, Interest::READABLE)
                    .map_err(|e| NetError::os("epoll_ctl(listener)", e))?;
                let _ = self.bound.set(Bound { local_addr: local, fd: None });
                self.listener = Some(listener);
                kinfo!(self.log, "{}: listening on {}", self.name, local);
            }
            Some(Endpoint::Connect(addr)) => {
                let stream = sys::connect_with_retry(addr, self.config.connect_attempts, self.config.connect_backoff)?;
                let local = stream
                    .local_addr()
                    .map_err(|e| NetError::os("getsockname", e))?;
                let fd = stream.as_raw_fd();
                self.register(stream);
                if !self.conns.contains_key(&fd) {
                    return Err(NetError::SetupFailed(format!("{}: connection rejected at open", self.name)));
                }
                let _ = self.bound.set(Bound { local_addr: local, fd: Some(fd) });
                kinfo!(self.log, "{}: connected fd {} {} -> {}", self.name, fd, local, addr);
            }
            None => return Err(NetError::SetupFailed(format!("{}: no endpoint", self.name))),
        }
        Ok(())
    }

    fn process(&mut self, _ctx: &ThreadContext) -> bool {
        let waited = match &self.poller {
            Some(poller) => poller.wait(&mut self.events, self.config.poll_timeout),
            None => return false,
        };
        if let Err(e) = waited {
            kerror!(
                self.log,
                "{}: epoll_wait failed: {} (errno {})",
                self.name,
                e,
                e.raw_os_error().unwrap_or(0)
            );
            self.stats.on_error();
            return false;
        }

        for i in 0..self.events.len() {
            let Some(ev) = self.events.get(i) else {
                break;
            };
            match ev.token {
                WAKER => {
                    self.outbox.notifier().drain();
                }
                LISTENER => self.accept_all(),
                _ => self.dispatch(ev),
            }
        }

        self.drain_outbox();
        true
    }

    fn cleanup(&mut self) {
        let dropped = self.outbox.close();
        if dropped > 0 {
            kwarn!(self.log, "{}: dropped {} queued commands at stop", self.name, dropped);
        }

        let fds: Vec<RawFd> = self.conns.keys().copied().collect();
        for fd in fds {
            self.close_conn(fd, CloseReason::Shutdown);
        }
        if let (Some(poller), Some(listener)) = (&self.poller, &self.listener) {
            let _ = poller.delete(listener.as_raw_fd());
        }
        self.listener = None;
        self.poller = None;
        kinfo!(self.log, "{}: stopped ({})", self.name, self.stats.snapshot());
    }
}

/// A running reactor thread plus the handles needed to talk to it.
pub(crate) struct Reactor<H: Handler> {
    thread: ManagedThread<ReactorWorker<H>>,
    handle: ReactorHandle,
    stats: Arc<ReactorStats>,
    bound: Bound,
}

impl<H: Handler> Reactor<H> {
    /// Spawn the reactor thread and wait for its setup.
    ///
    /// `make_handler` receives the reactor's own handle before the thread
    /// starts, so handlers can reply through it.
    pub(crate) fn start<F>(
        name: String,
        endpoint: Endpoint,
        config: ReactorConfig,
        log: Arc<dyn LogSink>,
        make_handler: F,
    ) -> Result<Self>
    where
        F: FnOnce(ReactorHandle) -> H,
    {
        config.validate()?;

        let outbox = Arc::new(Outbox::new(config.outbox_capacity)?);
        let handle = ReactorHandle::new(Arc::clone(&outbox));
        let handler = make_handler(handle.clone());
        let stats = Arc::new(ReactorStats::default());
        let bound = Arc::new(OnceLock::new());

        let worker = ReactorWorker {
            name: name.clone(),
            endpoint: Some(endpoint),
            events: Events::with_capacity(config.max_events),
            buf: vec![0u8; config.read_buffer],
            handler,
            poller: None,
            listener: None,
            conns: HashMap::new(),
            outbox: Arc::clone(&outbox),
            stats: Arc::clone(&stats),
            bound: Arc::clone(&bound),
            log: Arc::clone(&log),
            config: config.clone(),
        };

        let mut thread = ManagedThread::new(name.clone(), config.loop_delay);
        if let Err(e) = thread.start(worker) {
            outbox.close();
            kerror!(log, "{}: setup failed: {}", name, e);
            return Err(e);
        }

        let bound = match bound.get() {
            Some(b) => *b,
            None => return Err(NetError::SetupFailed(format!("{}: no local address", name))),
        };

        Ok(Self { thread, handle, stats, bound })
    }

    pub(crate) fn handle(&self) -> &ReactorHandle {
        &self.handle
    }

    pub(crate) fn stats(&self) -> &Arc<ReactorStats> {
        &self.stats
    }

    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.bound.local_addr
    }

    /// The connected fd of a client reactor.
    pub(crate) fn peer_fd(&self) -> Option<RawFd> {
        self.bound.fd
    }

    pub(crate) fn is_running(&self) -> bool {
        self.thread.is_running()
    }

    /// Request the stop, cut the wait short, and join.
    pub(crate) fn stop(&mut self) {
        self.thread.request_stop();
        let _ = self.handle.wake();
        let _ = self.thread.stop();
    }
}

impl<H: Handler> Drop for Reactor<H> {
    fn drop(&mut self) {
        self.stop();
    }
}
