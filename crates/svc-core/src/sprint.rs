//! Kernel-style leveled print macros.
//!
//! Thread-safe, context-aware debug output similar to Linux kernel's
//! printk. Automatically includes worker id, service id, and optional
//! timestamp.
//!
//! # Environment Variables
//!
//! - `SVCRT_LOG_FLUSH=1` - flush stderr after each print
//! - `SVCRT_LOG_LEVEL=<level>` - off/error/warn/info/debug/trace (or 0-5)
//! - `SVCRT_LOG_TIME=1` - include a nanosecond timestamp in output
//!
//! # Output Format
//!
//! Without timestamp: `[LEVEL] [w<worker>:s<service>] message`
//! With timestamp:    `[LEVEL] [<ns>] [w<worker>:s<service>] message`
//!
//! # Usage
//!
//! ```ignore
//! use svc_core::{sdebug, sinfo, swarn, serror};
//!
//! sdebug!("processing message session={}", session);
//! sinfo!("service initialized");
//! swarn!("unexpected status: {:?}", status);
//! serror!("resume failed");
//! ```

use crate::env::env_get_bool;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Instant;

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

static FLUSH_ENABLED: AtomicBool = AtomicBool::new(false);
static TIME_ENABLED: AtomicBool = AtomicBool::new(false);
static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);
static INITIALIZED: AtomicBool = AtomicBool::new(false);

static START_TIME: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize logging from environment variables. Called automatically on
/// first log, but can be called explicitly for deterministic init.
pub fn init() {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    START_TIME.get_or_init(Instant::now);
    FLUSH_ENABLED.store(env_get_bool("SVCRT_LOG_FLUSH", false), Ordering::Relaxed);
    TIME_ENABLED.store(env_get_bool("SVCRT_LOG_TIME", false), Ordering::Relaxed);

    if let Ok(val) = std::env::var("SVCRT_LOG_LEVEL") {
        let level = match val.to_lowercase().as_str() {
            "off" | "0" => LogLevel::Off,
            "error" | "1" => LogLevel::Error,
            "warn" | "2" => LogLevel::Warn,
            "info" | "3" => LogLevel::Info,
            "debug" | "4" => LogLevel::Debug,
            "trace" | "5" => LogLevel::Trace,
            _ => LogLevel::Info,
        };
        LOG_LEVEL.store(level as u8, Ordering::Relaxed);
    }
}

#[inline]
pub fn flush_enabled() -> bool {
    if !INITIALIZED.load(Ordering::Relaxed) {
        init();
    }
    FLUSH_ENABLED.load(Ordering::Relaxed)
}

#[inline]
pub fn time_enabled() -> bool {
    if !INITIALIZED.load(Ordering::Relaxed) {
        init();
    }
    TIME_ENABLED.load(Ordering::Relaxed)
}

#[inline]
pub fn log_level() -> LogLevel {
    if !INITIALIZED.load(Ordering::Relaxed) {
        init();
    }
    LogLevel::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

pub fn set_log_level(level: LogLevel) {
    LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn set_flush_enabled(enabled: bool) {
    FLUSH_ENABLED.store(enabled, Ordering::Relaxed);
}

pub fn set_time_enabled(enabled: bool) {
    TIME_ENABLED.store(enabled, Ordering::Relaxed);
}

#[inline]
pub fn level_enabled(level: LogLevel) -> bool {
    level as u8 <= log_level() as u8
}

#[inline]
pub fn elapsed_ns() -> u64 {
    let start = START_TIME.get_or_init(Instant::now);
    start.elapsed().as_nanos() as u64
}

thread_local! {
    static WORKER_ID: std::cell::Cell<Option<u32>> = const { std::cell::Cell::new(None) };
    static SERVICE_ID: std::cell::Cell<Option<u32>> = const { std::cell::Cell::new(None) };
}

/// Set current worker id for this thread (called by the runtime).
pub fn set_worker_id(id: u32) {
    WORKER_ID.with(|w| w.set(Some(id)));
}

pub fn clear_worker_id() {
    WORKER_ID.with(|w| w.set(None));
}

/// Set the service currently being resumed on this thread.
pub fn set_service_id(id: u32) {
    SERVICE_ID.with(|s| s.set(Some(id)));
}

pub fn clear_service_id() {
    SERVICE_ID.with(|s| s.set(None));
}

#[inline]
pub fn get_worker_id() -> Option<u32> {
    WORKER_ID.with(|w| w.get())
}

#[inline]
pub fn get_service_id() -> Option<u32> {
    SERVICE_ID.with(|s| s.get())
}

fn format_context() -> String {
    let worker = match get_worker_id() {
        Some(id) => format!("w{}", id),
        None => "w--".to_string(),
    };
    let service = match get_service_id() {
        Some(id) => format!("s{}", id),
        None => "s--".to_string(),
    };
    format!("[{}:{}]", worker, service)
}

#[doc(hidden)]
pub fn _sprint_impl(args: std::fmt::Arguments<'_>) {
    let stderr = std::io::stderr();
    let mut handle = stderr.lock();
    let _ = handle.write_fmt(args);
    if flush_enabled() {
        let _ = handle.flush();
    }
}

#[doc(hidden)]
pub fn _sprintln_impl(args: std::fmt::Arguments<'_>) {
    let stderr = std::io::stderr();
    let mut handle = stderr.lock();
    let _ = handle.write_fmt(args);
    let _ = handle.write_all(b"\n");
    if flush_enabled() {
        let _ = handle.flush();
    }
}

#[doc(hidden)]
pub fn _slog_impl(level: LogLevel, args: std::fmt::Arguments<'_>) {
    if !level_enabled(level) {
        return;
    }

    let stderr = std::io::stderr();
    let mut handle = stderr.lock();

    let _ = write!(handle, "{} ", level.prefix());
    if time_enabled() {
        let _ = write!(handle, "[{}] ", elapsed_ns());
    }
    let _ = write!(handle, "{} ", format_context());
    let _ = handle.write_fmt(args);
    let _ = handle.write_all(b"\n");

    if flush_enabled() {
        let _ = handle.flush();
    }
}

/// Print to stderr (no newline, no context). Like `eprint!`.
#[macro_export]
macro_rules! sprint {
    ($($arg:tt)*) => {{
        $crate::sprint::_sprint_impl(format_args!($($arg)*));
    }};
}

/// Print to stderr with newline (no context). Like `eprintln!`.
#[macro_export]
macro_rules! sprintln {
    () => {{
        $crate::sprint::_sprintln_impl(format_args!(""));
    }};
    ($($arg:tt)*) => {{
        $crate::sprint::_sprintln_impl(format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! serror {
    ($($arg:tt)*) => {{
        $crate::sprint::_slog_impl($crate::sprint::LogLevel::Error, format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! swarn {
    ($($arg:tt)*) => {{
        $crate::sprint::_slog_impl($crate::sprint::LogLevel::Warn, format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! sinfo {
    ($($arg:tt)*) => {{
        $crate::sprint::_slog_impl($crate::sprint::LogLevel::Info, format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! sdebug {
    ($($arg:tt)*) => {{
        $crate::sprint::_slog_impl($crate::sprint::LogLevel::Debug, format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! strace {
    ($($arg:tt)*) => {{
        $crate::sprint::_slog_impl($crate::sprint::LogLevel::Trace, format_args!($($arg)*));
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_levels_order() {
        assert!(LogLevel::Error < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Debug);
        assert!(LogLevel::Debug < LogLevel::Trace);
    }

    #[test]
    fn level_from_u8() {
        assert_eq!(LogLevel::from_u8(0), LogLevel::Off);
        assert_eq!(LogLevel::from_u8(4), LogLevel::Debug);
        assert_eq!(LogLevel::from_u8(99), LogLevel::Trace);
    }

    #[test]
    fn context_set_and_clear() {
        assert_eq!(get_worker_id(), None);
        set_worker_id(5);
        assert_eq!(get_worker_id(), Some(5));
        set_service_id(42);
        assert_eq!(get_service_id(), Some(42));
        clear_worker_id();
        clear_service_id();
        assert_eq!(get_worker_id(), None);
        assert_eq!(get_service_id(), None);
    }

    #[test]
    fn elapsed_ns_increases() {
        let t1 = elapsed_ns();
        std::thread::sleep(std::time::Duration::from_millis(1));
        let t2 = elapsed_ns();
        assert!(t2 > t1);
    }

    #[test]
    fn macros_compile() {
        set_log_level(LogLevel::Off);
        sprint!("test");
        sprintln!("test {}", 42);
        serror!("error {}", "msg");
        swarn!("warn");
        sinfo!("info");
        sdebug!("debug");
        strace!("trace");
    }
}
