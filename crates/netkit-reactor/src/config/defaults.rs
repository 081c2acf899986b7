//! Compile-time defaults for `ReactorConfig`.

/// Upper bound on one `epoll_wait` (milliseconds). Also bounds stop latency
/// when no wake is delivered.
pub const POLL_TIMEOUT_MS: u64 = 100;

/// Events fetched per `epoll_wait`.
pub const MAX_EVENTS: usize = 256;

/// Per-read buffer size.
pub const READ_BUFFER: usize = 4096;

/// `listen()` backlog.
pub const BACKLOG: i32 = 1024;

/// Outbound commands queued before `send()` reports `QueueFull`.
pub const OUTBOX_CAPACITY: usize = 4096;

/// Client-side delay between connect and the first send (milliseconds).
pub const SETTLE_MS: u64 = 50;

/// Client connect attempts before setup fails.
pub const CONNECT_ATTEMPTS: usize = 1;

/// Pause between client connect attempts (milliseconds).
pub const CONNECT_BACKOFF_MS: u64 = 100;

/// Delay between reactor iterations (microseconds). The wait timeout does
/// the pacing, so this is normally zero.
pub const LOOP_DELAY_US: u64 = 0;

/// Thread name prefix.
pub const NAME_PREFIX: &str = "netkit-reactor";
