//! Wait-free single-producer/single-consumer ring queue.
//!
//! Capacity must be a power of two so indexing reduces to a mask. There is
//! exactly one producer thread and exactly one consumer thread per
//! instance -- calling `push` from two threads concurrently, or `pop` from
//! two threads concurrently, is a programmer error and is not guarded
//! against here (that's the "single" in SPSC).

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A bounded SPSC ring of `T`. `capacity` is rounded up to the next power
/// of two no smaller than 2.
pub struct RingQueue<T> {
    mask: usize,
    head: AtomicUsize,
    tail: AtomicUsize,
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
}

unsafe impl<T: Send> Send for RingQueue<T> {}
unsafe impl<T: Send> Sync for RingQueue<T> {}

impl<T> RingQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2).next_power_of_two();
        let mut slots = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            slots.push(UnsafeCell::new(MaybeUninit::uninit()));
        }
        Self {
            mask: capacity - 1,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            slots: slots.into_boxed_slice(),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    #[inline]
    fn index(&self, pos: usize) -> usize {
        pos & self.mask
    }

    /// Current occupied length. May be stale the instant it's read by
    /// anyone other than producer+consumer, but is exact when called by
    /// either of them between operations.
    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        tail.wrapping_sub(head)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity() - 1
    }

    /// Producer-only. Returns `Err(value)` if the ring is full. A size-`N`
    /// ring holds at most `N-1` items -- the slot past `tail+1 == head`
    /// (mod capacity) is always left empty so `head == tail` unambiguously
    /// means "empty" rather than colliding with "full".
    pub fn push(&self, value: T) -> Result<(), T> {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if tail.wrapping_sub(head) >= self.capacity() - 1 {
            return Err(value);
        }
        let idx = self.index(tail);
        unsafe {
            (*self.slots[idx].get()).write(value);
        }
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Consumer-only. Returns `None` if the ring is empty.
    pub fn pop(&self) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        let idx = self.index(head);
        let value = unsafe { (*self.slots[idx].get()).assume_init_read() };
        self.head.store(head.wrapping_add(1), Ordering::Release);
        Some(value)
    }
}

impl<T> Drop for RingQueue<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn rounds_capacity_to_pow2() {
        let q: RingQueue<u32> = RingQueue::new(3);
        assert_eq!(q.capacity(), 4);
    }

    #[test]
    fn push_pop_round_trips() {
        let q: RingQueue<u32> = RingQueue::new(4);
        q.push(7).unwrap();
        assert_eq!(q.pop(), Some(7));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn capacity_two_fills_after_one() {
        let q: RingQueue<u32> = RingQueue::new(2);
        assert!(q.push(1).is_ok());
        assert!(q.push(2).is_err());
        assert_eq!(q.pop(), Some(1));
        assert!(q.push(2).is_ok());
    }

    #[test]
    fn drop_releases_owned_values() {
        let q: RingQueue<Box<u32>> = RingQueue::new(4);
        q.push(Box::new(1)).unwrap();
        q.push(Box::new(2)).unwrap();
        drop(q);
    }

    #[test]
    fn concurrent_spsc_preserves_order() {
        let q = Arc::new(RingQueue::<u32>::new(256));
        let producer = {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                for i in 0..10_000u32 {
                    loop {
                        if q.push(i).is_ok() {
                            break;
                        }
                        thread::yield_now();
                    }
                }
            })
        };
        let consumer = {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                let mut next = 0u32;
                while next < 10_000 {
                    if let Some(v) = q.pop() {
                        assert_eq!(v, next);
                        next += 1;
                    } else {
                        thread::yield_now();
                    }
                }
            })
        };
        producer.join().unwrap();
        consumer.join().unwrap();
    }
}
