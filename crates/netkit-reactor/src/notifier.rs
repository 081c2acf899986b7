//! `EventFd` - wakes a reactor blocked in `epoll_wait`.
//!
//! Coalescing: several `notify()` calls before the reactor drains the
//! eventfd produce a single wakeup (eventfd counter semantics).

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use nix::errno::Errno;

use netkit_core::error::{NetError, Result};

pub struct EventFd {
    fd: OwnedFd,
}

impl EventFd {
    /// Create a non-blocking, close-on-exec eventfd.
    pub fn create() -> Result<Self> {
        let raw = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        let raw = Errno::result(raw).map_err(|e| NetError::os("eventfd", e.into()))?;
        Ok(Self { fd: unsafe { OwnedFd::from_raw_fd(raw) } })
    }

    pub fn fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// Bump the counter. Safe from any thread.
    pub fn notify(&self) -> io::Result<()> {
        let val: u64 = 1;
        let ret = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                &val as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            // EAGAIN: the counter is saturated, a wakeup is already pending.
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(());
            }
            return Err(err);
        }
        Ok(())
    }

    /// Reset the counter. Returns how many notifications were coalesced.
    pub fn drain(&self) -> u64 {
        let mut val: u64 = 0;
        let ret = unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                &mut val as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            return 0;
        }
        val
    }
}

impl std::fmt::Debug for EventFd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventFd").field("fd", &self.fd()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notifications_coalesce() {
        let efd = EventFd::create().unwrap();
        assert_eq!(efd.drain(), 0);
        efd.notify().unwrap();
        efd.notify().unwrap();
        efd.notify().unwrap();
        assert_eq!(efd.drain(), 3);
        assert_eq!(efd.drain(), 0);
    }

    #[test]
    fn test_notify_from_other_thread() {
        let efd = std::sync::Arc::new(EventFd::create().unwrap());
        let remote = std::sync::Arc::clone(&efd);
        std::thread::spawn(move || remote.notify().unwrap()).join().unwrap();
        assert_eq!(efd.drain(), 1);
    }
}
