//! Compile-time defaults for `PoolConfig`.

/// Worker count when neither the caller nor the environment picks one.
/// `0` means "size from the CPU count" (see `auto_workers`).
pub const NUM_WORKERS: usize = 0;

/// Upper bound on workers.
pub const MAX_WORKERS: usize = 256;

/// Sleep between polls of an empty queue (microseconds).
pub const IDLE_DELAY_US: u64 = 500;

/// Tasks a worker runs per `process()` call before re-checking for stop.
pub const BATCH: usize = 64;

/// `wait_all()` polling interval (milliseconds).
pub const DRAIN_POLL_MS: u64 = 1;

/// Thread name prefix; workers are named `<prefix>-<index>`.
pub const NAME_PREFIX: &str = "netkit-pool";

/// Pool sizing from the CPU count: min(8, nproc/2), at least 2.
pub fn auto_workers() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    (cpus / 2).clamp(2, 8)
}
