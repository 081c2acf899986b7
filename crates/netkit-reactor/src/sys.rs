//! Socket setup helpers
//!
//! Setup-time calls only. Everything here may block or fail; the reactor
//! maps failures to `NetError` and never calls these from the service loop
//! except `accept_nonblocking`.

use std::io;
use std::mem;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::thread;
use std::time::Duration;

use nix::errno::Errno;

use netkit_core::error::{NetError, Result};

/// Create a non-blocking listening socket bound to `addr`.
///
/// `SO_REUSEADDR` is set so a restarted server can rebind while old
/// connections sit in TIME_WAIT. Port 0 picks an ephemeral port; read it
/// back with `TcpListener::local_addr`.
pub fn bind_listener(addr: SocketAddr, backlog: i32) -> Result<TcpListener> {
    let domain = match addr {
        SocketAddr::V4(_) => libc::AF_INET,
        SocketAddr::V6(_) => libc::AF_INET6,
    };

    let raw = unsafe {
        libc::socket(
            domain,
            libc::SOCK_STREAM | libc::SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
            0,
        )
    };
    let raw = Errno::result(raw).map_err(|e| NetError::os("socket", e.into()))?;
    // From here on the fd is closed on every early return.
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };

    set_int_opt(fd.as_raw_fd(), libc::SOL_SOCKET, libc::SO_REUSEADDR, 1)
        .map_err(|e| NetError::os("setsockopt(SO_REUSEADDR)", e))?;

    let ret = match addr {
        SocketAddr::V4(v4) => {
            let mut sa: libc::sockaddr_in = unsafe { mem::zeroed() };
            sa.sin_family = libc::AF_INET as libc::sa_family_t;
            sa.sin_port = v4.port().to_be();
            sa.sin_addr.s_addr = u32::from_ne_bytes(v4.ip().octets());
            unsafe {
                libc::bind(
                    fd.as_raw_fd(),
                    &sa as *const _ as *const libc::sockaddr,
                    mem::size_of_val(&sa) as libc::socklen_t,
                )
            }
        }
        SocketAddr::V6(v6) => {
            let mut sa: libc::sockaddr_in6 = unsafe { mem::zeroed() };
            sa.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            sa.sin6_port = v6.port().to_be();
            sa.sin6_addr.s6_addr = v6.ip().octets();
            sa.sin6_flowinfo = v6.flowinfo();
            sa.sin6_scope_id = v6.scope_id();
            unsafe {
                libc::bind(
                    fd.as_raw_fd(),
                    &sa as *const _ as *const libc::sockaddr,
                    mem::size_of_val(&sa) as libc::socklen_t,
                )
            }
        }
    };
    Errno::result(ret).map_err(|e| NetError::os("bind", e.into()))?;

    let ret = unsafe { libc::listen(fd.as_raw_fd(), backlog) };
    Errno::result(ret).map_err(|e| NetError::os("listen", e.into()))?;

    Ok(TcpListener::from(fd))
}

/// Accept one pending connection as a non-blocking, close-on-exec stream.
///
/// `WouldBlock` means the backlog is drained.
pub fn accept_nonblocking(listener: &TcpListener) -> io::Result<TcpStream> {
    let raw = unsafe {
        libc::accept4(
            listener.as_raw_fd(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
        )
    };
    if raw < 0 {
        return Err(io::Error::last_os_error());
    }
    let stream = TcpStream::from(unsafe { OwnedFd::from_raw_fd(raw) });
    // Small request/response traffic; latency matters more than batching.
    let _ = stream.set_nodelay(true);
    Ok(stream)
}

/// Blocking connect, retried while interrupted by a signal. The returned
/// stream is already non-blocking.
pub fn connect(addr: SocketAddr) -> Result<TcpStream> {
    let stream = loop {
        match TcpStream::connect(addr) {
            Ok(s) => break s,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(NetError::os("connect", e)),
        }
    };
    stream
        .set_nonblocking(true)
        .map_err(|e| NetError::os("fcntl(O_NONBLOCK)", e))?;
    let _ = stream.set_nodelay(true);
    Ok(stream)
}

/// `connect` with a bounded number of attempts, for servers that may not be
/// listening yet.
pub fn connect_with_retry(addr: SocketAddr, attempts: usize, backoff: Duration) -> Result<TcpStream> {
    let mut last = NetError::NotRunning;
    for attempt in 0..attempts.max(1) {
        match connect(addr) {
            Ok(s) => return Ok(s),
            Err(e) => last = e,
        }
        if attempt + 1 < attempts {
            thread::sleep(backoff);
        }
    }
    Err(last)
}

fn set_int_opt(fd: RawFd, level: libc::c_int, name: libc::c_int, value: libc::c_int) -> io::Result<()> {
    let ret = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            &value as *const _ as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn test_bind_ephemeral_port() {
        let listener = bind_listener(loopback(), 16).unwrap();
        let addr = listener.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
    }

    #[test]
    fn test_bind_in_use_fails_with_op() {
        let a = bind_listener(loopback(), 16).unwrap();
        let taken = a.local_addr().unwrap();
        // SO_REUSEADDR does not allow two live listeners on one port.
        let err = bind_listener(taken, 16).unwrap_err();
        assert!(format!("{}", err).starts_with("bind failed"), "{err}");
        assert_eq!(err.errno(), Some(libc::EADDRINUSE));
    }

    #[test]
    fn test_accept_would_block_when_idle() {
        let listener = bind_listener(loopback(), 16).unwrap();
        let err = accept_nonblocking(&listener).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn test_connect_and_accept() {
        let listener = bind_listener(loopback(), 16).unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = connect(addr).unwrap();

        let mut server = loop {
            match accept_nonblocking(&listener) {
                Ok(s) => break s,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::yield_now(),
                Err(e) => panic!("accept: {e}"),
            }
        };

        client.write_all(b"hi").unwrap();
        let mut buf = [0u8; 2];
        let mut got = 0;
        while got < 2 {
            match server.read(&mut buf[got..]) {
                Ok(n) => got += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::yield_now(),
                Err(e) => panic!("read: {e}"),
            }
        }
        assert_eq!(&buf, b"hi");
    }

    #[test]
    fn test_connect_refused() {
        let addr = {
            let l = bind_listener(loopback(), 1).unwrap();
            l.local_addr().unwrap()
        };
        let err = connect_with_retry(addr, 2, Duration::from_millis(1)).unwrap_err();
        assert!(err.errno().is_some());
    }
}
