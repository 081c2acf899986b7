//! Connection events handed from a pool-backed reactor to worker threads.

use std::fmt;
use std::os::unix::io::RawFd;

/// What a `ConnectionEvent` reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A new connection was accepted (or a client connected).
    Connect,
    /// Bytes arrived.
    Data,
    /// The connection is gone; the fd has been deregistered and closed.
    Eof,
}

/// One unit of inbound activity on a connection.
///
/// The reply destination is `fd`. Ownership moves from the reactor thread
/// into the pool task; nothing else holds a reference.
///
/// The fd is only meaningful while the connection is open. After an `Eof`
/// event the kernel may reuse the number, so replies should go through the
/// reactor's handle, which checks the fd is still registered.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionEvent {
    pub fd: RawFd,
    pub payload: Vec<u8>,
    pub eof: bool,
    pub connect: bool,
}

impl ConnectionEvent {
    pub fn connected(fd: RawFd) -> Self {
        Self { fd, payload: Vec::new(), eof: false, connect: true }
    }

    pub fn data(fd: RawFd, payload: Vec<u8>) -> Self {
        Self { fd, payload, eof: false, connect: false }
    }

    pub fn eof(fd: RawFd) -> Self {
        Self { fd, payload: Vec::new(), eof: true, connect: false }
    }

    pub fn kind(&self) -> EventKind {
        if self.connect {
            EventKind::Connect
        } else if self.eof {
            EventKind::Eof
        } else {
            EventKind::Data
        }
    }
}

impl fmt::Debug for ConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionEvent")
            .field("fd", &self.fd)
            .field("kind", &self.kind())
            .field("len", &self.payload.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(ConnectionEvent::connected(4).kind(), EventKind::Connect);
        assert_eq!(ConnectionEvent::data(4, b"ping".to_vec()).kind(), EventKind::Data);
        assert_eq!(ConnectionEvent::eof(4).kind(), EventKind::Eof);
    }

    #[test]
    fn test_debug_hides_payload() {
        let ev = ConnectionEvent::data(9, b"secret".to_vec());
        let text = format!("{:?}", ev);
        assert!(text.contains("fd: 9"));
        assert!(text.contains("len: 6"));
        assert!(!text.contains("secret"));
    }
}
