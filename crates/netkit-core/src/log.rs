//! Leveled log sink, kernel-print style
//!
//! Components never reach for a global logger. Each one is handed an
//! `Arc<dyn LogSink>` when it is built and logs through the `k*!` macros,
//! which take the sink as their first argument.
//!
//! # Environment Variables (read by `StderrSink::from_env`)
//!
//! - `NETKIT_FLUSH_EPRINT=1` - Flush stderr after each line (useful for debugging crashes)
//! - `NETKIT_LOG_LEVEL=<level>` - 0=off, 1=error, 2=warn, 3=info, 4=debug, 5=trace
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use netkit_core::log::{LogSink, StderrSink};
//! use netkit_core::{kinfo, kwarn};
//!
//! let log: Arc<dyn LogSink> = Arc::new(StderrSink::from_env());
//! kinfo!(log, "reactor listening on {}", addr);
//! kwarn!(log, "fd={} read failed: {}", fd, err);
//! ```

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Mutex;

use crate::env::{env_get_bool, env_get_str};

/// Log levels (matches common conventions)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Off,
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    /// Parse a level name or digit; unknown strings map to `Info`.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "off" | "0" => LogLevel::Off,
            "error" | "1" => LogLevel::Error,
            "warn" | "2" => LogLevel::Warn,
            "info" | "3" => LogLevel::Info,
            "debug" | "4" => LogLevel::Debug,
            "trace" | "5" => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            LogLevel::Off => "",
            LogLevel::Error => "[ERROR]",
            LogLevel::Warn => "[WARN] ",
            LogLevel::Info => "[INFO] ",
            LogLevel::Debug => "[DEBUG]",
            LogLevel::Trace => "[TRACE]",
        }
    }
}

/// Destination for log lines.
///
/// **Contract:**
/// - `log()` is fire-and-forget. It must not block the caller for longer
///   than the sink's own I/O.
/// - `enabled()` lets the macros skip formatting for filtered levels.
pub trait LogSink: Send + Sync {
    /// Emit one message at `level`.
    fn log(&self, level: LogLevel, message: &str);

    /// Whether `level` would be emitted.
    fn enabled(&self, level: LogLevel) -> bool {
        level != LogLevel::Off
    }
}

impl<T: LogSink + ?Sized> LogSink for std::sync::Arc<T> {
    fn log(&self, level: LogLevel, message: &str) {
        (**self).log(level, message);
    }

    fn enabled(&self, level: LogLevel) -> bool {
        (**self).enabled(level)
    }
}

/// Writes `[LEVEL] message` lines to stderr.
///
/// Each line is written under the stderr lock so lines from different
/// threads never interleave.
#[derive(Debug)]
pub struct StderrSink {
    level: AtomicU8,
    flush: AtomicBool,
}

impl StderrSink {
    pub fn new(level: LogLevel) -> Self {
        Self {
            level: AtomicU8::new(level as u8),
            flush: AtomicBool::new(false),
        }
    }

    /// Build from `NETKIT_LOG_LEVEL` / `NETKIT_FLUSH_EPRINT`.
    pub fn from_env() -> Self {
        let sink = Self::new(LogLevel::parse(&env_get_str("NETKIT_LOG_LEVEL", "info")));
        sink.set_flush_enabled(env_get_bool("NETKIT_FLUSH_EPRINT", false));
        sink
    }

    pub fn level(&self) -> LogLevel {
        LogLevel::from_u8(self.level.load(Ordering::Relaxed))
    }

    /// Set log level programmatically
    pub fn set_level(&self, level: LogLevel) {
        self.level.store(level as u8, Ordering::Relaxed);
    }

    /// Set flush mode programmatically
    pub fn set_flush_enabled(&self, enabled: bool) {
        self.flush.store(enabled, Ordering::Relaxed);
    }
}

impl Default for StderrSink {
    fn default() -> Self {
        Self::from_env()
    }
}

impl LogSink for StderrSink {
    fn log(&self, level: LogLevel, message: &str) {
        if !self.enabled(level) {
            return;
        }
        let stderr = std::io::stderr();
        let mut handle = stderr.lock();
        let _ = writeln!(handle, "{} {}", level.prefix(), message);
        if self.flush.load(Ordering::Relaxed) {
            let _ = handle.flush();
        }
    }

    #[inline]
    fn enabled(&self, level: LogLevel) -> bool {
        level != LogLevel::Off && level as u8 <= self.level.load(Ordering::Relaxed)
    }
}

/// Keeps every line in memory. Used by tests to assert on what was logged.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<(LogLevel, String)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything logged so far.
    pub fn lines(&self) -> Vec<(LogLevel, String)> {
        match self.lines.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Number of lines at exactly `level`.
    pub fn count(&self, level: LogLevel) -> usize {
        self.lines().iter().filter(|(l, _)| *l == level).count()
    }

    /// True if any line contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|(_, m)| m.contains(needle))
    }
}

impl LogSink for MemorySink {
    fn log(&self, level: LogLevel, message: &str) {
        let mut guard = match self.lines.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.push((level, message.to_string()));
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl LogSink for NullSink {
    fn log(&self, _level: LogLevel, _message: &str) {}

    fn enabled(&self, _level: LogLevel) -> bool {
        false
    }
}

/// Internal: Leveled print through a sink
#[doc(hidden)]
pub fn _klog_impl<S: LogSink + ?Sized>(sink: &S, level: LogLevel, args: std::fmt::Arguments<'_>) {
    if !sink.enabled(level) {
        return;
    }
    match args.as_str() {
        Some(s) => sink.log(level, s),
        None => sink.log(level, &args.to_string()),
    }
}

// ============================================================================
// Public Macros
// ============================================================================

/// Error level log
#[macro_export]
macro_rules! kerror {
    ($sink:expr, $($arg:tt)*) => {{
        $crate::log::_klog_impl(
            &*$sink,
            $crate::log::LogLevel::Error,
            format_args!($($arg)*)
        );
    }};
}

/// Warning level log
#[macro_export]
macro_rules! kwarn {
    ($sink:expr, $($arg:tt)*) => {{
        $crate::log::_klog_impl(
            &*$sink,
            $crate::log::LogLevel::Warn,
            format_args!($($arg)*)
        );
    }};
}

/// Info level log
#[macro_export]
macro_rules! kinfo {
    ($sink:expr, $($arg:tt)*) => {{
        $crate::log::_klog_impl(
            &*$sink,
            $crate::log::LogLevel::Info,
            format_args!($($arg)*)
        );
    }};
}

/// Debug level log
#[macro_export]
macro_rules! kdebug {
    ($sink:expr, $($arg:tt)*) => {{
        $crate::log::_klog_impl(
            &*$sink,
            $crate::log::LogLevel::Debug,
            format_args!($($arg)*)
        );
    }};
}

/// Trace level log (most verbose)
#[macro_export]
macro_rules! ktrace {
    ($sink:expr, $($arg:tt)*) => {{
        $crate::log::_klog_impl(
            &*$sink,
            $crate::log::LogLevel::Trace,
            format_args!($($arg)*)
        );
    }};
}

// ============================================================================
// Tests
// ============================================================================
