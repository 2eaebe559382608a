//! Per-worker coordination state: the ready/done handoff slots, the
//! binding (affinity) queue, and the parking primitive a worker blocks on
//! when it has nothing to do.
//!
//! Grounded directly in the original `struct worker_thread`/`binding_service`
//! and their `worker_*` functions: `service_ready`/`service_done` are
//! single-producer cross-thread slots resolved with CAS only where two
//! sides can race to consume the same slot; the binding queue is touched
//! exclusively by the scheduler thread (`worker_binding_job` enqueues,
//! `worker_assign_job` dequeues), so it needs no atomics of its own.

use crate::parking::Parking;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use svc_core::{SpinLock, ServiceId};

const BINDING_QUEUE_SIZE: usize = svc_core::constants::BINDING_QUEUE_SIZE;

struct BindingQueue {
    head: usize,
    tail: usize,
    q: [u32; BINDING_QUEUE_SIZE],
}

impl BindingQueue {
    fn new() -> Self {
        Self { head: 0, tail: 0, q: [0; BINDING_QUEUE_SIZE] }
    }

    fn push(&mut self, id: ServiceId) -> bool {
        if self.tail - self.head >= BINDING_QUEUE_SIZE {
            return false;
        }
        self.q[self.tail % BINDING_QUEUE_SIZE] = id.as_u32();
        self.tail += 1;
        true
    }

    fn pop(&mut self) -> Option<ServiceId> {
        if self.tail == self.head {
            return None;
        }
        let id = self.q[self.head % BINDING_QUEUE_SIZE];
        self.head += 1;
        if self.head == self.tail {
            self.head = 0;
            self.tail = 0;
        }
        Some(ServiceId::from_raw(id))
    }
}

/// One worker thread's cross-thread coordination state.
///
/// `running` is touched only by the worker thread that owns this slot (set
/// when it takes a job, cleared when it completes one) and is therefore a
/// plain field, not an atomic.
pub struct Worker<P: Parking> {
    pub worker_id: u32,
    service_ready: AtomicU32,
    service_done: AtomicU32,
    running: std::cell::Cell<u32>,
    waiting: AtomicU32,
    term_signal: AtomicBool,
    sleeping: AtomicBool,
    wakeup: AtomicBool,
    binding_queue: SpinLock<BindingQueue>,
    schedule_time: AtomicU64,
    trigger: P,
}

// SAFETY: `running` is only ever touched by the thread that calls
// `get_job`/`complete_job` for this worker (the worker thread itself); every
// other field is atomic or behind `SpinLock`.
unsafe impl<P: Parking + Send> Sync for Worker<P> {}

impl<P: Parking> Worker<P> {
    pub fn new(worker_id: u32, trigger: P) -> Self {
        Self {
            worker_id,
            service_ready: AtomicU32::new(0),
            service_done: AtomicU32::new(0),
            running: std::cell::Cell::new(0),
            waiting: AtomicU32::new(0),
            term_signal: AtomicBool::new(false),
            sleeping: AtomicBool::new(false),
            wakeup: AtomicBool::new(false),
            binding_queue: SpinLock::new(BindingQueue::new()),
            schedule_time: AtomicU64::new(0),
            trigger,
        }
    }

    #[inline]
    pub fn has_job(&self) -> bool {
        self.service_ready.load(Ordering::Acquire) != 0
    }

    pub fn running(&self) -> ServiceId {
        ServiceId::from_raw(self.running.get())
    }

    pub fn waiting(&self) -> ServiceId {
        ServiceId::from_raw(self.waiting.load(Ordering::Acquire))
    }

    pub fn set_waiting(&self, id: ServiceId) {
        self.waiting.store(id.as_u32(), Ordering::Release);
    }

    pub fn schedule_time(&self) -> u64 {
        self.schedule_time.load(Ordering::Relaxed)
    }

    pub fn request_quit(&self) {
        self.term_signal.store(true, Ordering::Release);
        self.quit_wake();
    }

    pub fn should_quit(&self) -> bool {
        self.term_signal.load(Ordering::Acquire)
    }

    /// Enqueue `id` onto this worker's binding queue. Scheduler-only.
    /// Returns `false` if the queue is full.
    pub fn binding_job(&self, id: ServiceId) -> bool {
        self.binding_queue.lock().push(id)
    }

    /// True if the binding queue holds entries still waiting for this
    /// worker's ready slot to free up. Scheduler-only.
    pub fn has_binding_pending(&self) -> bool {
        let q = self.binding_queue.lock();
        q.tail != q.head
    }

    /// Hand `candidate` to this worker if its ready slot is empty,
    /// preferring anything already queued in its own binding queue.
    /// Scheduler-only. Returns the id actually assigned, or `None` if the
    /// worker already had a job.
    pub fn assign_job(&self, candidate: ServiceId, now_0p1ms: u64) -> Option<ServiceId> {
        if self.service_ready.load(Ordering::Acquire) != 0 {
            return None;
        }
        let id = self.binding_queue.lock().pop().unwrap_or(candidate);
        self.service_ready.store(id.as_u32(), Ordering::Release);
        self.schedule_time.store(now_0p1ms, Ordering::Relaxed);
        Some(id)
    }

    /// Consume the ready slot. Worker-only.
    pub fn get_job(&self) -> Option<ServiceId> {
        loop {
            let job = self.service_ready.load(Ordering::Acquire);
            if job == 0 {
                return None;
            }
            if self
                .service_ready
                .compare_exchange(job, 0, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.running.set(job);
                return Some(ServiceId::from_raw(job));
            }
        }
    }

    /// Reclaim a stale ready slot. Scheduler-only. `is_bound_here` reports
    /// whether the pool has pinned the pending job to this worker; if so
    /// the steal is refused, matching the original's affinity guard.
    pub fn steal_job(&self, is_bound_here: impl FnOnce(ServiceId) -> bool) -> Option<ServiceId> {
        let job = self.service_ready.load(Ordering::Acquire);
        if job == 0 {
            return None;
        }
        let id = ServiceId::from_raw(job);
        if is_bound_here(id) {
            return None;
        }
        if self
            .service_ready
            .compare_exchange(job, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.waiting.store(0, Ordering::Release);
            return Some(id);
        }
        None
    }

    /// Take the completed job, if any. Scheduler-only, single consumer.
    pub fn done_job(&self) -> Option<ServiceId> {
        let done = self.service_done.swap(0, Ordering::AcqRel);
        if done == 0 {
            None
        } else {
            Some(ServiceId::from_raw(done))
        }
    }

    /// Publish the currently-running service as complete. Worker-only,
    /// single producer, so a bare CAS from the empty state suffices.
    pub fn complete_job(&self) -> bool {
        let running = self.running.get();
        if self
            .service_done
            .compare_exchange(0, running, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.running.set(0);
            true
        } else {
            false
        }
    }

    /// Park until woken, unless a job has already been handed over or a
    /// wakeup is already pending (mirrors `worker_sleep`).
    pub fn park(&self) {
        if self.term_signal.load(Ordering::Acquire) {
            return;
        }
        let guard = self.trigger.wait_begin();
        let guard = if self.has_job() {
            self.wakeup.store(false, Ordering::Release);
            guard
        } else if self.wakeup.swap(false, Ordering::AcqRel) {
            guard
        } else {
            self.sleeping.store(true, Ordering::Release);
            let (guard, _) = self.trigger.wait(guard, None);
            self.sleeping.store(false, Ordering::Release);
            guard
        };
        self.trigger.wait_end(guard);
    }

    /// Wake this worker. Returns whether it was actually asleep.
    pub fn wake(&self) -> bool {
        let guard = self.trigger.trigger_begin();
        let sleeping = self.sleeping.load(Ordering::Acquire);
        self.wakeup.store(true, Ordering::Release);
        self.trigger.trigger_end(guard, sleeping);
        sleeping
    }

    fn quit_wake(&self) {
        let guard = self.trigger.trigger_begin();
        self.sleeping.store(false, Ordering::Release);
        self.trigger.trigger_end(guard, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parking::CondvarParking;

    fn worker(id: u32) -> Worker<CondvarParking> {
        Worker::new(id, CondvarParking::new())
    }

    #[test]
    fn assign_then_get_round_trips() {
        let w = worker(1);
        let svc = ServiceId::from_raw(7);
        assert_eq!(w.assign_job(svc, 100), Some(svc));
        assert!(w.has_job());
        assert_eq!(w.get_job(), Some(svc));
        assert!(!w.has_job());
        assert_eq!(w.running(), svc);
        assert_eq!(w.schedule_time(), 100);
    }

    #[test]
    fn assign_refuses_when_busy() {
        let w = worker(1);
        let a = ServiceId::from_raw(1);
        let b = ServiceId::from_raw(2);
        assert_eq!(w.assign_job(a, 0), Some(a));
        assert_eq!(w.assign_job(b, 0), None);
    }

    #[test]
    fn binding_queue_takes_priority_over_candidate() {
        let w = worker(1);
        let bound = ServiceId::from_raw(42);
        let candidate = ServiceId::from_raw(99);
        assert!(w.binding_job(bound));
        assert_eq!(w.assign_job(candidate, 0), Some(bound));
    }

    #[test]
    fn steal_refuses_bound_job() {
        let w = worker(1);
        let svc = ServiceId::from_raw(5);
        w.assign_job(svc, 0);
        assert_eq!(w.steal_job(|_| true), None);
        assert!(w.has_job());
    }

    #[test]
    fn steal_takes_unbound_job() {
        let w = worker(1);
        let svc = ServiceId::from_raw(5);
        w.assign_job(svc, 0);
        assert_eq!(w.steal_job(|_| false), Some(svc));
        assert!(!w.has_job());
    }

    #[test]
    fn complete_then_done_round_trips() {
        let w = worker(1);
        let svc = ServiceId::from_raw(3);
        w.assign_job(svc, 0);
        w.get_job();
        assert!(w.complete_job());
        assert_eq!(w.done_job(), Some(svc));
        assert_eq!(w.done_job(), None);
    }

    #[test]
    fn wake_reports_whether_sleeping() {
        let w = std::sync::Arc::new(worker(1));
        let waiter = std::sync::Arc::clone(&w);
        let handle = std::thread::spawn(move || waiter.park());
        std::thread::sleep(std::time::Duration::from_millis(30));
        let was_sleeping = w.wake();
        assert!(was_sleeping);
        handle.join().unwrap();
    }
}
