//! Linux futex fast path for [`super::Parking`].
//!
//! Skips the `Mutex`/`Condvar` pair entirely: the flag itself is the futex
//! word, so `trigger_begin`/`wait_begin` need no lock and return `()`.
//! Falls back to a spin-check before each `FUTEX_WAIT` to avoid a syscall
//! when the flag is already set, matching the common case where the
//! scheduler wakes a worker that hasn't gone to sleep yet.

use super::Parking;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::time::Duration;

const FUTEX_WAIT: i32 = 0;
const FUTEX_WAKE: i32 = 1;

#[inline]
fn futex_wait(word: &AtomicI32, expected: i32, timeout: Option<Duration>) -> i32 {
    let ts = timeout.map(|d| libc::timespec {
        tv_sec: d.as_secs() as libc::time_t,
        tv_nsec: d.subsec_nanos() as i64,
    });
    let ts_ptr = ts
        .as_ref()
        .map(|t| t as *const libc::timespec)
        .unwrap_or(std::ptr::null());
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            word as *const AtomicI32 as *const i32,
            FUTEX_WAIT,
            expected,
            ts_ptr,
        ) as i32
    }
}

#[inline]
fn futex_wake(word: &AtomicI32, n: i32) {
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            word as *const AtomicI32 as *const i32,
            FUTEX_WAKE,
            n,
        );
    }
}

pub struct FutexParking {
    flag: AtomicI32,
    parked: AtomicUsize,
}

impl FutexParking {
    pub fn new() -> Self {
        Self {
            flag: AtomicI32::new(0),
            parked: AtomicUsize::new(0),
        }
    }
}

impl Default for FutexParking {
    fn default() -> Self {
        Self::new()
    }
}

impl Parking for FutexParking {
    type Trigger<'a> = ();
    type Wait<'a> = ();

    fn trigger_begin(&self) {
        self.flag.store(1, Ordering::Release);
    }

    fn trigger_end(&self, _guard: (), wake: bool) {
        // Unlike `CondvarParking`, `wait_begin` here takes no lock, so there
        // is no critical section shared with `trigger_begin`/`trigger_end`
        // to make a "roll the flag back to 0" decision safe: a waiter could
        // be between its own flag check and the blocking `futex_wait`
        // syscall at this exact moment, and a bare store(0, ..) here would
        // erase the pending wake with nothing left to unblock it. So the
        // flag, once set by `trigger_begin`, is only ever cleared by
        // `wait_end` -- `wake == false` skips the syscall but leaves the
        // flag set, which only costs the next `park()` one uncontended
        // `wait_end` instead of an actual block.
        if wake {
            futex_wake(&self.flag, 1);
        }
    }

    fn wait_begin(&self) {}

    fn wait<'a>(&'a self, _guard: (), timeout: Option<Duration>) -> ((), bool) {
        self.parked.fetch_add(1, Ordering::Relaxed);
        let deadline = timeout.map(|d| std::time::Instant::now() + d);
        let woke;
        loop {
            if self.flag.load(Ordering::Acquire) != 0 {
                woke = true;
                break;
            }
            let remaining = match deadline {
                None => None,
                Some(dl) => {
                    let now = std::time::Instant::now();
                    if now >= dl {
                        woke = false;
                        break;
                    }
                    Some(dl - now)
                }
            };
            futex_wait(&self.flag, 0, remaining);
        }
        self.parked.fetch_sub(1, Ordering::Relaxed);
        ((), woke)
    }

    fn wait_end(&self, _guard: ()) {
        self.flag.store(0, Ordering::Release);
    }

    fn parked_count(&self) -> usize {
        self.parked.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn trigger_then_wait_sees_flag() {
        let p = FutexParking::new();
        p.trigger_end(p.trigger_begin(), false);
        p.trigger_end(p.trigger_begin(), true);

        let guard = p.wait_begin();
        let (guard, woke) = p.wait(guard, Some(Duration::from_millis(50)));
        p.wait_end(guard);
        assert!(woke);
    }

    #[test]
    fn wait_times_out_without_trigger() {
        let p = FutexParking::new();
        let guard = p.wait_begin();
        let (guard, woke) = p.wait(guard, Some(Duration::from_millis(20)));
        p.wait_end(guard);
        assert!(!woke);
    }

    #[test]
    fn cross_thread_wake() {
        let p = Arc::new(FutexParking::new());
        let waiter = Arc::clone(&p);
        let handle = thread::spawn(move || {
            let guard = waiter.wait_begin();
            let (guard, woke) = waiter.wait(guard, Some(Duration::from_secs(2)));
            waiter.wait_end(guard);
            woke
        });

        thread::sleep(Duration::from_millis(20));
        p.trigger_end(p.trigger_begin(), true);

        assert!(handle.join().unwrap());
    }
}
