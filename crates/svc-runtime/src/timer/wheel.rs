//! Hierarchical timing wheel.
//!
//! Four-level cascade matching the original `struct timer`: a 256-slot
//! "near" wheel indexed by the low 8 bits of the absolute tick, plus four
//! 64-slot cascade wheels, each covering the next 6 bits upward. Ticks are
//! 0.1 ms. Entries are plain owned payloads in a `Vec` per slot rather than
//! the original's intrusive singly-linked `timer_node` list -- the same
//! move-all-entries-out-then-reinsert behavior, with Rust ownership instead
//! of manual `malloc`/`free`.

use svc_core::SpinLock;

const TIME_NEAR_SHIFT: u32 = 8;
const TIME_NEAR: usize = 1 << TIME_NEAR_SHIFT;
const TIME_NEAR_MASK: u32 = (TIME_NEAR as u32) - 1;
const TIME_LEVEL_SHIFT: u32 = 6;
const TIME_LEVEL: usize = 1 << TIME_LEVEL_SHIFT;
const TIME_LEVEL_MASK: u32 = (TIME_LEVEL as u32) - 1;
const CASCADE_LEVELS: usize = 4;

/// A scheduled entry: an absolute expiry tick plus an opaque payload.
struct Entry<T> {
    expire: u32,
    payload: T,
}

struct Wheels<T> {
    near: Vec<Vec<Entry<T>>>,
    cascade: [Vec<Vec<Entry<T>>>; CASCADE_LEVELS],
    time: u32,
}

impl<T> Wheels<T> {
    fn new() -> Self {
        Self {
            near: (0..TIME_NEAR).map(|_| Vec::new()).collect(),
            cascade: std::array::from_fn(|_| (0..TIME_LEVEL).map(|_| Vec::new()).collect()),
            time: 0,
        }
    }

    /// Insert `entry` into the slot matching its absolute `expire` tick
    /// relative to the wheel's current `time`.
    fn add_node(&mut self, entry: Entry<T>) {
        let time = entry.expire;
        let current = self.time;

        if (time | TIME_NEAR_MASK) == (current | TIME_NEAR_MASK) {
            self.near[(time & TIME_NEAR_MASK) as usize].push(entry);
            return;
        }

        let mut mask: u64 = (TIME_NEAR as u64) << TIME_LEVEL_SHIFT;
        let mut level = 0;
        while level < CASCADE_LEVELS - 1 {
            if (time as u64 | (mask - 1)) == (current as u64 | (mask - 1)) {
                break;
            }
            mask <<= TIME_LEVEL_SHIFT;
            level += 1;
        }
        let idx = ((time >> (TIME_NEAR_SHIFT + (level as u32) * TIME_LEVEL_SHIFT)) & TIME_LEVEL_MASK) as usize;
        self.cascade[level][idx].push(entry);
    }

    fn move_list(&mut self, level: usize, idx: usize) {
        let entries = std::mem::take(&mut self.cascade[level][idx]);
        for entry in entries {
            self.add_node(entry);
        }
    }

    /// Advance the wheel by one tick, cascading as needed. Returns entries
    /// whose slot the new `time` now indexes in the near wheel.
    fn shift(&mut self) {
        let mut mask = TIME_NEAR as u32;
        let ct = self.time.wrapping_add(1);
        self.time = ct;

        if ct == 0 {
            self.move_list(CASCADE_LEVELS - 1, 0);
            return;
        }

        let mut time = ct >> TIME_NEAR_SHIFT;
        let mut level = 0;
        while (ct & (mask.wrapping_sub(1))) == 0 {
            let idx = (time & TIME_LEVEL_MASK) as usize;
            if idx != 0 {
                self.move_list(level, idx);
                break;
            }
            mask <<= TIME_LEVEL_SHIFT;
            time >>= TIME_LEVEL_SHIFT;
            level += 1;
            if level >= CASCADE_LEVELS {
                break;
            }
        }
    }

    fn drain_near_due(&mut self) -> Vec<T> {
        let idx = (self.time & TIME_NEAR_MASK) as usize;
        std::mem::take(&mut self.near[idx])
            .into_iter()
            .map(|e| e.payload)
            .collect()
    }
}

/// A hierarchical timing wheel scheduling delayed payload dispatch at
/// 0.1 ms tick granularity.
pub struct TimingWheel<T> {
    wheels: SpinLock<Wheels<T>>,
    /// Wall-clock tick (0.1ms units) at which the wheel was started.
    start_tick_0p1ms: u64,
    /// Last `now` passed to `update`, in absolute 0.1ms ticks.
    current_point: std::sync::atomic::AtomicU64,
}

impl<T> TimingWheel<T> {
    pub fn new(start_tick_0p1ms: u64) -> Self {
        Self {
            wheels: SpinLock::new(Wheels::new()),
            start_tick_0p1ms,
            current_point: std::sync::atomic::AtomicU64::new(start_tick_0p1ms),
        }
    }

    pub fn start_tick(&self) -> u64 {
        self.start_tick_0p1ms
    }

    pub fn current_tick(&self) -> u32 {
        self.wheels.lock().time
    }

    /// Schedule `payload` to fire `delay_ticks` ticks from now.
    pub fn add(&self, payload: T, delay_ticks: u32) {
        let mut wheels = self.wheels.lock();
        let expire = wheels.time.wrapping_add(delay_ticks);
        wheels.add_node(Entry { expire, payload });
    }

    /// Advance the wheel to absolute time `now_0p1ms`, invoking `dispatch`
    /// for every payload that fires along the way. `dispatch` is called
    /// outside the wheel's internal lock.
    ///
    /// Returns the number of ticks advanced. A negative drift (clock
    /// regression) is rejected: `current_point` is resynchronized to `now`
    /// and no ticks are emitted for the regression interval.
    pub fn update(&self, now_0p1ms: u64, mut dispatch: impl FnMut(T)) -> u64 {
        let last = self.current_point.load(std::sync::atomic::Ordering::Acquire);
        if now_0p1ms < last {
            self.current_point.store(now_0p1ms, std::sync::atomic::Ordering::Release);
            return 0;
        }
        let diff = now_0p1ms - last;
        self.current_point.store(now_0p1ms, std::sync::atomic::Ordering::Release);

        for _ in 0..diff {
            self.tick(&mut dispatch);
        }
        diff
    }

    fn tick(&self, dispatch: &mut impl FnMut(T)) {
        // (1) dispatch entries already due in the near slot (catches delay 0)
        let due = { self.wheels.lock().drain_near_due() };
        for payload in due {
            dispatch(payload);
        }

        // (2) advance time, cascading as needed
        { self.wheels.lock().shift(); }

        // (3) dispatch again -- cascade may have just populated this slot
        let due = { self.wheels.lock().drain_near_due() };
        for payload in due {
            dispatch(payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn fires_at_zero_delay_within_same_tick() {
        let wheel: TimingWheel<u32> = TimingWheel::new(0);
        wheel.add(42, 0);
        let fired = Arc::new(Mutex::new(Vec::new()));
        let f = Arc::clone(&fired);
        wheel.update(1, move |p| f.lock().unwrap().push(p));
        assert_eq!(*fired.lock().unwrap(), vec![42]);
    }

    #[test]
    fn fires_exactly_once_at_requested_delay() {
        let wheel: TimingWheel<u32> = TimingWheel::new(0);
        wheel.add(7, 300);
        let fired = Arc::new(Mutex::new(Vec::new()));

        let f = Arc::clone(&fired);
        wheel.update(299, move |p| f.lock().unwrap().push(p));
        assert!(fired.lock().unwrap().is_empty());

        let f = Arc::clone(&fired);
        wheel.update(300, move |p| f.lock().unwrap().push(p));
        assert_eq!(*fired.lock().unwrap(), vec![7]);
    }

    #[test]
    fn fires_once_across_cascade_boundary() {
        let wheel: TimingWheel<u32> = TimingWheel::new(0);
        wheel.add(99, 16384);
        let fired = Arc::new(Mutex::new(Vec::new()));
        let f = Arc::clone(&fired);
        wheel.update(16384, move |p| f.lock().unwrap().push(p));
        assert_eq!(*fired.lock().unwrap(), vec![99]);
    }

    #[test]
    fn clock_regression_is_rejected_without_emitting_ticks() {
        let wheel: TimingWheel<u32> = TimingWheel::new(0);
        wheel.add(1, 10);
        let fired = Arc::new(Mutex::new(Vec::new()));

        let f = Arc::clone(&fired);
        wheel.update(5, move |p| f.lock().unwrap().push(p));
        assert!(fired.lock().unwrap().is_empty());

        // regression: now < last_point
        let f = Arc::clone(&fired);
        let advanced = wheel.update(2, move |p| f.lock().unwrap().push(p));
        assert_eq!(advanced, 0);
        assert!(fired.lock().unwrap().is_empty());

        let f = Arc::clone(&fired);
        wheel.update(10, move |p| f.lock().unwrap().push(p));
        assert_eq!(*fired.lock().unwrap(), vec![1]);
    }

    #[test]
    fn multiple_entries_in_same_slot_all_fire() {
        let wheel: TimingWheel<u32> = TimingWheel::new(0);
        wheel.add(1, 5);
        wheel.add(2, 5);
        wheel.add(3, 5);
        let fired = Arc::new(Mutex::new(Vec::new()));
        let f = Arc::clone(&fired);
        wheel.update(5, move |p| f.lock().unwrap().push(p));
        let mut got = fired.lock().unwrap().clone();
        got.sort();
        assert_eq!(got, vec![1, 2, 3]);
    }
}
