//! SIGINT/SIGTERM → stop flag, for long-running tools.
//!
//! The handler only stores to an atomic. The main thread polls
//! `requested()` and stops its reactors itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

use netkit_core::error::{NetError, Result};

static STOP: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(_sig: libc::c_int) {
    STOP.store(true, Ordering::Relaxed);
}

/// Install the handler for SIGINT and SIGTERM.
pub fn install() -> Result<()> {
    let action = SigAction::new(SigHandler::Handler(on_signal), SaFlags::SA_RESTART, SigSet::empty());
    for sig in [Signal::SIGINT, Signal::SIGTERM] {
        unsafe { sigaction(sig, &action) }.map_err(|e| NetError::os("sigaction", e.into()))?;
    }
    Ok(())
}

/// A stop signal has arrived (or `request()` was called).
pub fn requested() -> bool {
    STOP.load(Ordering::Relaxed)
}

/// Set the stop flag without a signal.
pub fn request() {
    STOP.store(true, Ordering::Relaxed);
}

/// Block until a stop is requested, calling `tick` every `interval`.
pub fn wait(interval: Duration, mut tick: impl FnMut()) {
    let mut last = Instant::now();
    while !requested() {
        std::thread::sleep(Duration::from_millis(100).min(interval));
        if last.elapsed() >= interval {
            tick();
            last = Instant::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_ends_wait() {
        install().unwrap();
        let waiter = std::thread::spawn(|| {
            let mut ticks = 0;
            wait(Duration::from_millis(5), || ticks += 1);
            ticks
        });
        std::thread::sleep(Duration::from_millis(30));
        request();
        waiter.join().unwrap();
        assert!(requested());
    }
}
