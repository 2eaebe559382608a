//! Flag-guarded parking primitive.
//!
//! Mirrors a small condition-variable wrapper from the task-scheduling core
//! this crate's worker coordination is grounded on: a lock-protected `flag`
//! plus a condition variable, exposing paired `trigger_begin`/`trigger_end`
//! and `wait_begin`/`wait`/`wait_end` calls rather than a single `park`/
//! `unpark`. The begin/end split lets a caller hold the guard across other
//! state changes (e.g. publishing a worker's ready-slot) before deciding
//! whether to signal or block, exactly as the original does.
//!
//! [`CondvarParking`] is the portable implementation (`Mutex` + `Condvar`).
//! On Linux, [`futex_linux::FutexParking`] provides a syscall-level fast
//! path behind the same trait.

mod fallback;

#[cfg(target_os = "linux")]
mod futex_linux;

pub use fallback::CondvarParking;

#[cfg(target_os = "linux")]
pub use futex_linux::FutexParking;

use std::time::Duration;

/// A flag-guarded wait/wake primitive, one per worker thread.
///
/// Implementations must guarantee that a `trigger_end(.., true)` call that
/// happens-before a `wait_begin()`/`wait()` pair is never missed: the flag
/// set by `trigger_begin` is observed by `wait` even if the wake arrives
/// before the waiter starts waiting.
pub trait Parking {
    /// Guard held across a trigger (wake) critical section.
    type Trigger<'a>: 'a
    where
        Self: 'a;
    /// Guard held across a wait critical section.
    type Wait<'a>: 'a
    where
        Self: 'a;

    /// Acquire the lock and mark the flag set. The caller may update other
    /// state before calling `trigger_end`.
    fn trigger_begin(&self) -> Self::Trigger<'_>;

    /// Release the lock acquired by `trigger_begin`. If `wake` is true the
    /// waiter is signaled; otherwise the flag set by `trigger_begin` is
    /// rolled back (mirrors the original's "trigger cancelled" path).
    fn trigger_end(&self, guard: Self::Trigger<'_>, wake: bool);

    /// Acquire the lock without touching the flag.
    fn wait_begin(&self) -> Self::Wait<'_>;

    /// Block until the flag is set (or `timeout` elapses). Returns the
    /// guard (so the caller can pass it on to `wait_end`) and `true` if
    /// woken by the flag, `false` on timeout.
    fn wait<'a>(&'a self, guard: Self::Wait<'a>, timeout: Option<Duration>) -> (Self::Wait<'a>, bool);

    /// Clear the flag and release the lock acquired by `wait_begin`.
    fn wait_end(&self, guard: Self::Wait<'_>);

    /// Number of threads currently between `wait_begin` and `wait_end`.
    fn parked_count(&self) -> usize;
}
