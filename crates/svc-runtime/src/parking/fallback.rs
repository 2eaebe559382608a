//! Portable parking primitive: `Mutex<bool>` + `Condvar`.
//!
//! Direct translation of the original's pthread-backed `struct cond`: the
//! mutex guards a flag, `trigger_begin` locks and sets it, `trigger_end`
//! either signals the condvar or rolls the flag back, and `wait` loops on
//! the flag (never trusting a single wakeup) exactly like the C source's
//! `while (!c->flag) pthread_cond_wait(...)`.

use super::Parking;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

pub struct CondvarParking {
    flag: Mutex<bool>,
    condvar: Condvar,
    parked: AtomicUsize,
}

impl CondvarParking {
    pub fn new() -> Self {
        Self {
            flag: Mutex::new(false),
            condvar: Condvar::new(),
            parked: AtomicUsize::new(0),
        }
    }
}

impl Default for CondvarParking {
    fn default() -> Self {
        Self::new()
    }
}

impl Parking for CondvarParking {
    type Trigger<'a> = MutexGuard<'a, bool>;
    type Wait<'a> = MutexGuard<'a, bool>;

    fn trigger_begin(&self) -> MutexGuard<'_, bool> {
        let mut guard = self.flag.lock().unwrap();
        *guard = true;
        guard
    }

    fn trigger_end(&self, mut guard: MutexGuard<'_, bool>, wake: bool) {
        if wake {
            self.condvar.notify_one();
        } else {
            *guard = false;
        }
        // Guard drops here, releasing the lock.
    }

    fn wait_begin(&self) -> MutexGuard<'_, bool> {
        self.flag.lock().unwrap()
    }

    fn wait<'a>(&'a self, guard: MutexGuard<'a, bool>, timeout: Option<Duration>) -> (MutexGuard<'a, bool>, bool) {
        self.parked.fetch_add(1, Ordering::Relaxed);
        let mut guard = guard;
        let result = match timeout {
            None => {
                while !*guard {
                    guard = self.condvar.wait(guard).unwrap();
                }
                true
            }
            Some(d) => {
                let deadline = Instant::now() + d;
                let mut woke = *guard;
                while !woke {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    let remaining = deadline - now;
                    let (new_guard, wait_result) = self.condvar.wait_timeout(guard, remaining).unwrap();
                    guard = new_guard;
                    woke = *guard;
                    if wait_result.timed_out() && !woke {
                        break;
                    }
                }
                woke
            }
        };
        self.parked.fetch_sub(1, Ordering::Relaxed);
        (guard, result)
    }

    fn wait_end(&self, mut guard: MutexGuard<'_, bool>) {
        *guard = false;
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
    fn trigger_then_wait_returns_immediately() {
        let p = CondvarParking::new();
        let guard = p.trigger_begin();
        p.trigger_end(guard, false);

        // set the flag without signalling, then wait should see it set already
        let guard = p.trigger_begin();
        p.trigger_end(guard, true);

        let wait_guard = p.wait_begin();
        let (wait_guard, woke) = p.wait(wait_guard, Some(Duration::from_millis(50)));
        p.wait_end(wait_guard);
        assert!(woke);
    }

    #[test]
    fn wait_times_out_without_trigger() {
        let p = CondvarParking::new();
        let wait_guard = p.wait_begin();
        let (wait_guard, woke) = p.wait(wait_guard, Some(Duration::from_millis(20)));
        p.wait_end(wait_guard);
        assert!(!woke);
    }

    #[test]
    fn cross_thread_wake() {
        let p = Arc::new(CondvarParking::new());
        let waiter = Arc::clone(&p);
        let handle = thread::spawn(move || {
            let guard = waiter.wait_begin();
            let (guard, woke) = waiter.wait(guard, Some(Duration::from_secs(2)));
            waiter.wait_end(guard);
            woke
        });

        thread::sleep(Duration::from_millis(20));
        let guard = p.trigger_begin();
        p.trigger_end(guard, true);

        assert!(handle.join().unwrap());
    }

    #[test]
    fn parked_count_tracks_active_waiters() {
        let p = Arc::new(CondvarParking::new());
        assert_eq!(p.parked_count(), 0);
        let waiter = Arc::clone(&p);
        let handle = thread::spawn(move || {
            let guard = waiter.wait_begin();
            let (guard, _) = waiter.wait(guard, Some(Duration::from_millis(100)));
            waiter.wait_end(guard);
        });
        thread::sleep(Duration::from_millis(20));
        assert_eq!(p.parked_count(), 1);
        handle.join().unwrap();
        assert_eq!(p.parked_count(), 0);
    }
}
