//! Managed OS threads
//!
//! A `ManagedThread` runs one `Worker` on a dedicated OS thread:
//!
//! ```text
//!   start() ──► setup() ──ok──► process() ─┬─ true ──► delay ──► process() ...
//!      ▲           │                        ├─ false ─┐
//!      └─ returns ─┘ (after setup)          └─ stop ──┴──► cleanup() ──► done
//! ```
//!
//! Cancellation is cooperative. `stop()` sets a flag that is checked
//! between `process()` calls and wakes the inter-iteration delay early. It
//! never interrupts a `process()` call, so a worker is never left holding a
//! half-consumed socket read.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use netkit_core::error::{NetError, Result};

/// Lifecycle of a managed thread.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Unstarted = 0,
    Running = 1,
    Stopping = 2,
    Done = 3,
}

impl ThreadState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ThreadState::Unstarted,
            1 => ThreadState::Running,
            2 => ThreadState::Stopping,
            _ => ThreadState::Done,
        }
    }
}

/// Body of a managed thread.
///
/// **Contract:**
/// - `setup()` runs once on the new thread before `start()` returns. An
///   error aborts the thread; `process()` and `cleanup()` are not called.
/// - `process()` is called repeatedly until it returns `false` or a stop is
///   requested. It should do a bounded amount of work per call.
/// - `cleanup()` runs exactly once after a successful `setup()`, however the
///   loop ended, and must release whatever `setup()` acquired.
pub trait Worker: Send + 'static {
    fn setup(&mut self) -> Result<()> {
        Ok(())
    }

    fn process(&mut self, ctx: &ThreadContext) -> bool;

    fn cleanup(&mut self) {}
}

struct Shared {
    state: AtomicU8,
    stop: AtomicBool,
    /// Guards nothing; pairs with `wake` for the interruptible delay.
    sleep_lock: Mutex<()>,
    wake: Condvar,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(ThreadState::Unstarted as u8),
            stop: AtomicBool::new(false),
            sleep_lock: Mutex::new(()),
            wake: Condvar::new(),
        }
    }

    fn set_state(&self, state: ThreadState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
        let _ = self.state.compare_exchange(
            ThreadState::Running as u8,
            ThreadState::Stopping as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        // Notify under the lock so a sleeper between its flag check and
        // its wait cannot miss the wakeup.
        let _guard = self.sleep_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.wake.notify_all();
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Sleep for `delay` or until a stop is requested.
    fn sleep(&self, delay: Duration) {
        let guard = self.sleep_lock.lock().unwrap_or_else(|e| e.into_inner());
        let _ = self
            .wake
            .wait_timeout_while(guard, delay, |_| !self.stop.load(Ordering::Acquire));
    }
}

/// Handed to `Worker::process()`; lets the body observe or request a stop.
#[derive(Clone)]
pub struct ThreadContext {
    shared: Arc<Shared>,
}

impl ThreadContext {
    /// True once anyone has asked this thread to stop.
    #[inline]
    pub fn stop_requested(&self) -> bool {
        self.shared.stop_requested()
    }

    /// Self-terminating stop: the loop ends after the current `process()`
    /// returns. Does not join (a thread cannot join itself).
    pub fn request_stop(&self) {
        self.shared.request_stop();
    }
}

/// One OS thread running a `Worker`.
///
/// Owned exclusively by its creator. Dropping it stops and joins the thread.
pub struct ManagedThread<W: Worker> {
    name: String,
    delay: Duration,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<W>>,
}

impl<W: Worker> ManagedThread<W> {
    /// Create an unstarted thread. `delay` is slept between `process()`
    /// calls; zero means back-to-back.
    pub fn new(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
            shared: Arc::new(Shared::new()),
            handle: None,
        }
    }

    /// Spawn the OS thread and block until `worker.setup()` has returned.
    ///
    /// On setup failure the thread has already exited and its error is
    /// returned here.
    pub fn start(&mut self, worker: W) -> Result<()> {
        if self.state() != ThreadState::Unstarted {
            return Err(NetError::SetupFailed(format!("{}: already started", self.name)));
        }

        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<()>>(1);
        let shared = Arc::clone(&self.shared);
        let delay = self.delay;

        let handle = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || run(worker, shared, delay, ready_tx))
            .map_err(NetError::Spawn)?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.handle = Some(handle);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                // Sender dropped without a verdict: setup panicked.
                let _ = handle.join();
                self.shared.set_state(ThreadState::Done);
                Err(NetError::SetupFailed(format!("{}: setup panicked", self.name)))
            }
        }
    }

    /// Stop the thread.
    ///
    /// From another thread: request cancellation, wake the delay, and block
    /// until the thread (including `cleanup()`) has finished. Returns the
    /// worker so the caller can inspect its final state.
    ///
    /// From the thread's own body: only requests the stop and returns
    /// `None`; the loop exits after the current `process()` call.
    pub fn stop(&mut self) -> Option<W> {
        let handle = self.handle.take()?;
        self.shared.request_stop();

        if handle.thread().id() == thread::current().id() {
            self.handle = Some(handle);
            return None;
        }
        handle.join().ok()
    }

    /// Request a stop without joining.
    pub fn request_stop(&self) {
        self.shared.request_stop();
    }

    pub fn state(&self) -> ThreadState {
        ThreadState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.state() == ThreadState::Running
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl<W: Worker> Drop for ManagedThread<W> {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

impl<W: Worker> std::fmt::Debug for ManagedThread<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedThread")
            .field("name", &self.name)
            .field("delay", &self.delay)
            .field("state", &self.state())
            .finish()
    }
}

/// Thread body.
fn run<W: Worker>(
    mut worker: W,
    shared: Arc<Shared>,
    delay: Duration,
    ready: mpsc::SyncSender<Result<()>>,
) -> W {
    if let Err(e) = worker.setup() {
        shared.set_state(ThreadState::Done);
        let _ = ready.send(Err(e));
        return worker;
    }

    // A stop requested before this point is still honored by the loop check.
    let _ = shared.state.compare_exchange(
        ThreadState::Unstarted as u8,
        ThreadState::Running as u8,
        Ordering::AcqRel,
        Ordering::Acquire,
    );
    let _ = ready.send(Ok(()));
    drop(ready);

    let ctx = ThreadContext { shared: Arc::clone(&shared) };
    loop {
        if ctx.stop_requested() {
            break;
        }
        if !worker.process(&ctx) {
            break;
        }
        if ctx.stop_requested() {
            break;
        }
        if !delay.is_zero() {
            shared.sleep(delay);
        }
    }

    shared.set_state(ThreadState::Stopping);
    worker.cleanup();
    shared.set_state(ThreadState::Done);
    worker
}
