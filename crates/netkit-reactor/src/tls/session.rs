//! Memory-buffered TLS session driven by a reactor.
//!
//! The session never owns or blocks on the socket. The reactor hands it a
//! `Read + Write` for one `service()` call; ciphertext moves between the
//! socket and two buffers, and the rustls engine sits in between.
//!
//! ```text
//!   socket ──read──▶ inbound ──read_tls──▶ engine ──reader──▶ callback
//!   socket ◀─write── outbound ◀─write_tls── engine ◀─writer── send()
//! ```

use std::io::{self, Read, Write};
use std::os::fd::RawFd;
use std::sync::Arc;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, ServerConfig, ServerConnection};

use netkit_core::error::{NetError, Result};

/// Which side of the handshake this session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

/// Session lifecycle. Every new session starts in `Handshaking`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsState {
    Handshaking,
    Established,
    /// close_notify queued; waiting for it to reach the socket.
    ShuttingDown,
    Closed,
}

/// Result of one `service()` pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpStatus {
    Open,
    /// The peer sent close_notify or closed the socket.
    PeerClosed,
}

/// Client or server rustls connection behind one interface.
enum Engine {
    Server(ServerConnection),
    Client(ClientConnection),
}

impl Engine {
    fn is_handshaking(&self) -> bool {
        match self {
            Self::Server(s) => s.is_handshaking(),
            Self::Client(c) => c.is_handshaking(),
        }
    }

    fn wants_write(&self) -> bool {
        match self {
            Self::Server(s) => s.wants_write(),
            Self::Client(c) => c.wants_write(),
        }
    }

    fn read_tls(&mut self, rd: &mut dyn Read) -> io::Result<usize> {
        match self {
            Self::Server(s) => s.read_tls(rd),
            Self::Client(c) => c.read_tls(rd),
        }
    }

    fn write_tls(&mut self, wr: &mut dyn Write) -> io::Result<usize> {
        match self {
            Self::Server(s) => s.write_tls(wr),
            Self::Client(c) => c.write_tls(wr),
        }
    }

    fn process_new_packets(&mut self) -> std::result::Result<rustls::IoState, rustls::Error> {
        match self {
            Self::Server(s) => s.process_new_packets(),
            Self::Client(c) => c.process_new_packets(),
        }
    }

    fn reader(&mut self) -> rustls::Reader<'_> {
        match self {
            Self::Server(s) => s.reader(),
            Self::Client(c) => c.reader(),
        }
    }

    fn writer(&mut self) -> rustls::Writer<'_> {
        match self {
            Self::Server(s) => s.writer(),
            Self::Client(c) => c.writer(),
        }
    }

    fn send_close_notify(&mut self) {
        match self {
            Self::Server(s) => s.send_close_notify(),
            Self::Client(c) => c.send_close_notify(),
        }
    }
}

/// Cleartext receive callback. It may call `send` or `close` on the session
/// it is handed; the output is written before the next socket read.
pub type TlsCallback = Box<dyn FnMut(&mut TlsSession, &[u8]) + Send + 'static>;

pub struct TlsSession {
    fd: RawFd,
    role: Role,
    state: TlsState,
    engine: Engine,
    /// Ciphertext read from the socket, not yet taken by the engine.
    inbound: Vec<u8>,
    /// Ciphertext produced by the engine, not yet taken by the socket.
    outbound: Vec<u8>,
    peer_closed: bool,
    /// The last `service` stopped reading because the socket was full.
    read_paused: bool,
}

impl TlsSession {
    pub fn new_server(fd: RawFd, config: Arc<ServerConfig>) -> Result<Self> {
        let mut conn = ServerConnection::new(config).map_err(|e| NetError::Tls(e.to_string()))?;
        conn.set_buffer_limit(None);
        Ok(Self::with_engine(fd, Role::Server, Engine::Server(conn)))
    }

    /// The ClientHello is queued immediately; flush it to start the handshake.
    pub fn new_client(fd: RawFd, config: Arc<ClientConfig>, server_name: ServerName<'static>) -> Result<Self> {
        let mut conn = ClientConnection::new(config, server_name).map_err(|e| NetError::Tls(e.to_string()))?;
        conn.set_buffer_limit(None);
        Ok(Self::with_engine(fd, Role::Client, Engine::Client(conn)))
    }

    fn with_engine(fd: RawFd, role: Role, engine: Engine) -> Self {
        Self {
            fd,
            role,
            state: TlsState::Handshaking,
            engine,
            inbound: Vec::new(),
            outbound: Vec::new(),
            peer_closed: false,
            read_paused: false,
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> TlsState {
        self.state
    }

    pub fn is_established(&self) -> bool {
        self.state == TlsState::Established
    }

    /// Append ciphertext read from the socket.
    pub fn feed(&mut self, ciphertext: &[u8]) {
        self.inbound.extend_from_slice(ciphertext);
    }

    /// Run buffered ciphertext through the engine.
    ///
    /// While handshaking this only advances the handshake. Once established,
    /// every non-empty cleartext chunk goes to `on_plain`. An engine error
    /// closes the session.
    pub fn process(&mut self, on_plain: &mut dyn FnMut(&mut TlsSession, &[u8])) -> Result<()> {
        while !self.inbound.is_empty() {
            let mut rd: &[u8] = &self.inbound;
            let n = match self.engine.read_tls(&mut rd) {
                Ok(n) => n,
                Err(e) => return Err(self.fail(e.to_string())),
            };
            if n == 0 {
                break;
            }
            self.inbound.drain(..n);

            let io_state = match self.engine.process_new_packets() {
                Ok(s) => s,
                Err(e) => {
                    // The engine may have queued an alert for the peer.
                    self.encode_outbound();
                    return Err(self.fail(e.to_string()));
                }
            };
            if io_state.peer_has_closed() {
                self.peer_closed = true;
            }
            if self.state == TlsState::Handshaking && !self.engine.is_handshaking() {
                self.state = TlsState::Established;
            }
            self.deliver_plaintext(io_state.plaintext_bytes_to_read(), on_plain)?;
        }
        Ok(())
    }

    fn deliver_plaintext(&mut self, available: usize, on_plain: &mut dyn FnMut(&mut TlsSession, &[u8])) -> Result<()> {
        if available == 0 || self.state == TlsState::Handshaking || self.state == TlsState::Closed {
            return Ok(());
        }
        let mut chunk = vec![0u8; available];
        let n = match self.engine.reader().read(&mut chunk) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => 0,
            Err(e) => return Err(self.fail(e.to_string())),
        };
        if n > 0 {
            on_plain(self, &chunk[..n]);
        }
        Ok(())
    }

    /// Queue cleartext for the peer. Accepted while handshaking (sent once
    /// the handshake completes) and when established.
    ///
    /// The engine's send buffer is unbounded, like a plain connection's
    /// pending output; a callback echoing input is throttled by `service`
    /// pausing its reads on a full socket.
    pub fn send(&mut self, cleartext: &[u8]) -> Result<()> {
        match self.state {
            TlsState::Handshaking | TlsState::Established => {}
            TlsState::ShuttingDown | TlsState::Closed => return Err(NetError::Closed),
        }
        self.engine
            .writer()
            .write_all(cleartext)
            .map_err(|e| NetError::Tls(e.to_string()))
    }

    /// Queue close_notify. The socket should be closed once `flush_to`
    /// reports everything written.
    pub fn close(&mut self) {
        match self.state {
            TlsState::Handshaking | TlsState::Established => {
                self.engine.send_close_notify();
                self.state = TlsState::ShuttingDown;
            }
            TlsState::ShuttingDown | TlsState::Closed => {}
        }
    }

    /// Move every record the engine has ready into the outbound buffer.
    pub fn encode_outbound(&mut self) {
        while self.engine.wants_write() {
            match self.engine.write_tls(&mut self.outbound) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
        }
    }

    /// Encode and write ciphertext until done or the socket would block.
    /// Returns `true` when nothing is left to write.
    pub fn flush_to(&mut self, io: &mut dyn Write) -> io::Result<bool> {
        self.encode_outbound();
        let mut off = 0;
        let result = loop {
            if off == self.outbound.len() {
                break Ok(true);
            }
            match io.write(&self.outbound[off..]) {
                Ok(0) => break Err(io::Error::from(io::ErrorKind::WriteZero)),
                Ok(n) => off += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(false),
                Err(e) => break Err(e),
            }
        };
        self.outbound.drain(..off);
        result
    }

    /// Ciphertext is waiting for the socket.
    pub fn wants_write(&self) -> bool {
        !self.outbound.is_empty() || self.engine.wants_write()
    }

    /// The peer has sent close_notify or hung up.
    pub fn peer_closed(&self) -> bool {
        self.peer_closed
    }

    /// Reading stopped on a full socket; call `service` again once it is
    /// writable.
    pub fn read_paused(&self) -> bool {
        self.read_paused
    }

    /// Tear down buffered state. Idempotent.
    pub fn mark_closed(&mut self) {
        self.state = TlsState::Closed;
        self.inbound.clear();
        self.outbound.clear();
    }

    /// Close after an engine error. Outbound keeps any alert for one last
    /// flush.
    fn fail(&mut self, msg: String) -> NetError {
        self.state = TlsState::Closed;
        self.inbound.clear();
        NetError::Tls(msg)
    }

    /// One reactor pass: read the socket until it would block, drive the
    /// engine, hand cleartext to `on_plain`, and write what it produced.
    ///
    /// Outbound ciphertext is drained after every engine pass, before the
    /// next read. If the socket stops taking it, reading pauses (see
    /// `read_paused`) until the next call.
    ///
    /// Engine failures come back as `InvalidData` and leave the session
    /// `Closed`; the engine's alert is written if the socket takes it.
    pub fn service<S: Read + Write>(
        &mut self,
        io: &mut S,
        buf: &mut [u8],
        on_plain: &mut dyn FnMut(&mut TlsSession, &[u8]),
    ) -> io::Result<PumpStatus> {
        self.read_paused = false;
        if !self.flush_to(io)? {
            self.read_paused = true;
            return Ok(PumpStatus::Open);
        }

        loop {
            match io.read(buf) {
                Ok(0) => {
                    self.peer_closed = true;
                    break;
                }
                Ok(n) => {
                    self.feed(&buf[..n]);
                    if let Err(e) = self.process(on_plain) {
                        let _ = self.flush_to(io);
                        self.outbound.clear();
                        return Err(tls_to_io(e));
                    }
                    if self.peer_closed {
                        // Nothing after close_notify matters.
                        break;
                    }
                    if !self.flush_to(io)? {
                        self.read_paused = true;
                        return Ok(PumpStatus::Open);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        self.flush_to(io)?;
        if self.peer_closed {
            Ok(PumpStatus::PeerClosed)
        } else {
            Ok(PumpStatus::Open)
        }
    }
}

fn tls_to_io(e: NetError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e.to_string())
}

impl std::fmt::Debug for TlsSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsSession")
            .field("fd", &self.fd)
            .field("role", &self.role)
            .field("state", &self.state)
            .field("inbound", &self.inbound.len())
            .field("outbound", &self.outbound.len())
            .finish()
    }
}
