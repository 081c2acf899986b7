//! Fixed-size thread pool over a `WorkQueue`
//!
//! Each worker is a `ManagedThread` whose `process()` drains up to `batch`
//! tasks, then returns so the stop flag is re-checked. An empty queue
//! costs one `idle_delay` sleep per poll.
//!
//! Task bodies are not wrapped in `catch_unwind`. A panicking task takes
//! its worker thread down with it; trapping errors is the task's job.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use netkit_core::error::{NetError, Result};
use netkit_core::log::LogSink;
use netkit_core::{kdebug, kinfo, kwarn};

use crate::config::PoolConfig;
use crate::thread::{ManagedThread, ThreadContext, Worker};
use crate::work_queue::WorkQueue;

/// A unit of work: a one-shot closure that owns its argument.
pub struct Task {
    job: Box<dyn FnOnce() + Send + 'static>,
    done: Option<Arc<AtomicBool>>,
}

impl Task {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self { job: Box::new(f), done: None }
    }

    /// `func(&mut arg)`, then `release(arg)` if given.
    ///
    /// Without a release function the argument is simply dropped after the
    /// call.
    pub fn with_arg<A, F, R>(func: F, arg: A, release: Option<R>) -> Self
    where
        A: Send + 'static,
        F: FnOnce(&mut A) + Send + 'static,
        R: FnOnce(A) + Send + 'static,
    {
        Self::new(move || {
            let mut arg = arg;
            func(&mut arg);
            if let Some(release) = release {
                release(arg);
            }
        })
    }

    /// Attach a done flag and return a handle to it.
    fn tracked(mut self) -> (Self, TaskStatus) {
        let flag = Arc::new(AtomicBool::new(false));
        self.done = Some(Arc::clone(&flag));
        (self, TaskStatus(flag))
    }

    /// Run the task on the current thread.
    pub fn run(self) {
        (self.job)();
        if let Some(done) = self.done {
            done.store(true, Ordering::Release);
        }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task").field("tracked", &self.done.is_some()).finish()
    }
}

/// Done flag of a submitted task.
#[derive(Debug, Clone)]
pub struct TaskStatus(Arc<AtomicBool>);

impl TaskStatus {
    pub fn is_done(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// State shared between the pool handle and its workers.
struct PoolShared {
    queue: WorkQueue<Task>,
    /// Workers between "about to pop" and "task finished".
    active: AtomicUsize,
    /// Completed-task count per worker, indexed by worker id.
    completed: Box<[AtomicU64]>,
    submitted: AtomicU64,
    shutdown: AtomicBool,
}

struct PoolWorker {
    id: usize,
    batch: usize,
    shared: Arc<PoolShared>,
}

impl Worker for PoolWorker {
    fn process(&mut self, ctx: &ThreadContext) -> bool {
        let shared = &*self.shared;
        for _ in 0..self.batch {
            if ctx.stop_requested() {
                break;
            }
            // Count ourselves active before popping so `wait_all` never sees
            // an empty queue while a popped task has not started.
            shared.active.fetch_add(1, Ordering::SeqCst);
            match shared.queue.pop() {
                Some(task) => {
                    task.run();
                    shared.completed[self.id].fetch_add(1, Ordering::Relaxed);
                    shared.active.fetch_sub(1, Ordering::SeqCst);
                }
                None => {
                    shared.active.fetch_sub(1, Ordering::SeqCst);
                    break;
                }
            }
        }
        true
    }
}

/// Fixed set of worker threads executing submitted tasks.
pub struct ThreadPool {
    config: PoolConfig,
    shared: Arc<PoolShared>,
    workers: Vec<ManagedThread<PoolWorker>>,
    log: Arc<dyn LogSink>,
}

impl ThreadPool {
    /// Validate `config` and start every worker.
    pub fn new(config: PoolConfig, log: Arc<dyn LogSink>) -> Result<Self> {
        config.validate()?;

        let completed: Vec<AtomicU64> = (0..config.workers).map(|_| AtomicU64::new(0)).collect();
        let shared = Arc::new(PoolShared {
            queue: WorkQueue::with_capacity(1024),
            active: AtomicUsize::new(0),
            completed: completed.into_boxed_slice(),
            submitted: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        });

        let mut pool = Self {
            workers: Vec::with_capacity(config.workers),
            shared,
            log,
            config,
        };

        for id in 0..pool.config.workers {
            let mut thread = ManagedThread::new(
                format!("{}-{}", pool.config.name_prefix, id),
                pool.config.idle_delay,
            );
            // On failure `pool` drops here and stops the workers already started.
            thread.start(PoolWorker {
                id,
                batch: pool.config.batch,
                shared: Arc::clone(&pool.shared),
            })?;
            pool.workers.push(thread);
        }

        kinfo!(pool.log, "pool '{}': started {} workers", pool.config.name_prefix, pool.config.workers);
        Ok(pool)
    }

    /// Queue a closure.
    pub fn submit<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit_task(Task::new(f))
    }

    /// Queue `func(&mut arg)` followed by `release(arg)`.
    pub fn submit_with<A, F, R>(&self, func: F, arg: A, release: Option<R>) -> Result<()>
    where
        A: Send + 'static,
        F: FnOnce(&mut A) + Send + 'static,
        R: FnOnce(A) + Send + 'static,
    {
        self.submit_task(Task::with_arg(func, arg, release))
    }

    /// Queue a closure and get a handle to its done flag.
    pub fn submit_tracked<F>(&self, f: F) -> Result<TaskStatus>
    where
        F: FnOnce() + Send + 'static,
    {
        let (task, status) = Task::new(f).tracked();
        self.submit_task(task)?;
        Ok(status)
    }

    pub fn submit_task(&self, task: Task) -> Result<()> {
        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err(NetError::NotRunning);
        }
        self.shared.queue.push(task);
        self.shared.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Sleep-poll until the queue is empty and no task is running.
    ///
    /// No deadline. Tasks submitted concurrently by other threads may or
    /// may not be covered.
    pub fn wait_all(&self) {
        while !self.is_idle() {
            std::thread::sleep(self.config.drain_poll);
        }
    }

    /// `wait_all` with a deadline. Returns `true` if the pool drained.
    pub fn wait_all_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.is_idle() {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(self.config.drain_poll);
        }
        true
    }

    fn is_idle(&self) -> bool {
        self.shared.queue.is_empty() && self.shared.active.load(Ordering::SeqCst) == 0
    }

    /// Tasks waiting in the queue (advisory).
    pub fn pending(&self) -> usize {
        self.shared.queue.len()
    }

    /// Workers currently popping or running a task.
    pub fn active(&self) -> usize {
        self.shared.active.load(Ordering::Relaxed)
    }

    pub fn workers(&self) -> usize {
        self.config.workers
    }

    pub fn submitted(&self) -> u64 {
        self.shared.submitted.load(Ordering::Relaxed)
    }

    pub fn completed_per_worker(&self) -> Vec<u64> {
        self.shared
            .completed
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect()
    }

    pub fn total_completed(&self) -> u64 {
        self.completed_per_worker().iter().sum()
    }

    /// Stop and join every worker. Tasks still queued are dropped (their
    /// arguments are dropped with them; release functions do not run).
    pub fn shutdown(&mut self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        for worker in &self.workers {
            worker.request_stop();
        }
        for mut worker in self.workers.drain(..) {
            let _ = worker.stop();
        }

        let dropped = self.shared.queue.clear();
        if dropped > 0 {
            kwarn!(self.log, "pool '{}': dropped {} queued tasks at shutdown", self.config.name_prefix, dropped);
        }
        kdebug!(
            self.log,
            "pool '{}': shut down after {} tasks",
            self.config.name_prefix,
            self.total_completed()
        );
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("workers", &self.config.workers)
            .field("pending", &self.pending())
            .field("active", &self.active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netkit_core::log::{MemorySink, NullSink};
    use std::sync::Mutex;

    fn pool(workers: usize) -> ThreadPool {
        let config = PoolConfig::new()
            .workers(workers)
            .idle_delay(Duration::from_micros(100))
            .name_prefix("test-pool");
        ThreadPool::new(config, Arc::new(NullSink)).unwrap()
    }

    #[test]
    fn test_wait_all_accounts_every_task() {
        let pool = pool(4);
        let counter = Arc::new(AtomicUsize::new(0));

        const M: usize = 10_000;
        for _ in 0..M {
            let c = Arc::clone(&counter);
            pool.submit(move || {
                c.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();
        }

        pool.wait_all();
        assert_eq!(pool.pending(), 0);
        assert_eq!(counter.load(Ordering::Relaxed), M);
        assert_eq!(pool.total_completed(), M as u64);
        assert_eq!(pool.completed_per_worker().len(), 4);
        assert_eq!(pool.submitted(), M as u64);
    }

    #[test]
    fn test_submit_with_runs_release_after_func() {
        let pool = pool(2);
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = Arc::clone(&order);
        let o2 = Arc::clone(&order);
        pool.submit_with(
            move |arg: &mut String| {
                arg.push_str("+func");
                o1.lock().unwrap().push(arg.clone());
            },
            String::from("arg"),
            Some(move |arg: String| o2.lock().unwrap().push(format!("{arg}+release"))),
        )
        .unwrap();

        pool.wait_all();
        assert_eq!(*order.lock().unwrap(), vec!["arg+func", "arg+func+release"]);
    }

    #[test]
    fn test_submit_with_no_release() {
        let pool = pool(1);
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        pool.submit_with(
            move |n: &mut usize| {
                h.fetch_add(*n, Ordering::Relaxed);
            },
            5usize,
            None::<fn(usize)>,
        )
        .unwrap();
        pool.wait_all();
        assert_eq!(hits.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn test_tracked_task() {
        let pool = pool(1);
        let status = pool.submit_tracked(|| {}).unwrap();
        assert!(pool.wait_all_timeout(Duration::from_secs(5)));
        assert!(status.is_done());
    }

    #[test]
    fn test_wait_all_timeout_expires_on_slow_task() {
        let pool = pool(1);
        let release = Arc::new(AtomicBool::new(false));
        let r = Arc::clone(&release);
        pool.submit(move || {
            while !r.load(Ordering::Acquire) {
                std::thread::sleep(Duration::from_millis(1));
            }
        })
        .unwrap();

        assert!(!pool.wait_all_timeout(Duration::from_millis(20)));
        release.store(true, Ordering::Release);
        assert!(pool.wait_all_timeout(Duration::from_secs(5)));
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let log = Arc::new(MemorySink::new());
        let config = PoolConfig::new().workers(2).name_prefix("closing");
        let mut pool = ThreadPool::new(config, log.clone()).unwrap();
        pool.shutdown();
        assert!(matches!(pool.submit(|| {}), Err(NetError::NotRunning)));
        assert!(log.contains("pool 'closing': started 2 workers"));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = PoolConfig::new().workers(0);
        assert!(ThreadPool::new(config, Arc::new(NullSink)).is_err());
    }
}
