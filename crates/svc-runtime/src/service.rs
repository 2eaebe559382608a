//! Per-service state: the interpreter handle, inbox, outbox, receipt slot,
//! memory accounting and CPU cost.
//!
//! Grounded in the original `struct service`/`struct memory_stat` and their
//! `service_*` functions in `service.c`. The outbox/receipt/binding/status
//! fields are written either by the single worker currently holding the
//! service or by the scheduler when no worker holds it, never both at once
//! (the ready/done handoff in `worker.rs` is the ordering barrier) — they
//! are still kept atomic or `SpinLock`-guarded here because diagnostic
//! readers (the pool's schedule-time report, tests) may observe them from a
//! third thread at any time and must not tear.

use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use svc_core::{Message, Receipt, ReceiptKind, RingQueue, ServiceError, ServiceId, ServiceResult, SpinLock};

use crate::crashlog::CrashLogSink;
use crate::interpreter::{Interpreter, InterpreterFactory, ResumeOutcome as InterpResumeOutcome};
use crate::timer::thread_cpu_ns;

/// Key the bootstrap bytes are published under in the interpreter's
/// registry, matching the original's `LTASK_KEY`.
pub const BOOTSTRAP_KEY: &str = "SVCRT_BOOTSTRAP";

const NONE_SENTINEL: usize = usize::MAX;
const LABEL_MAX: usize = 31;

/// Lifecycle state of a [`Service`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServiceStatus {
    Uninitialized = 0,
    Idle = 1,
    Scheduling = 2,
    Running = 3,
    Dead = 4,
}

impl ServiceStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ServiceStatus::Uninitialized,
            1 => ServiceStatus::Idle,
            2 => ServiceStatus::Scheduling,
            3 => ServiceStatus::Running,
            _ => ServiceStatus::Dead,
        }
    }
}

/// Coarse object-kind bucket for the allocation histogram, matching the
/// original's `TYPEID_*` constants (a Lua-specific `osize < LUA_NUMTYPES`
/// heuristic collapses onto this same six-way split; see DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum AllocKind {
    String = 0,
    Table = 1,
    Function = 2,
    UserData = 3,
    Thread = 4,
    Other = 5,
}

pub const ALLOC_KIND_COUNT: usize = 6;

/// Memory accounting block bound to one service's interpreter allocator.
/// Shared via `Arc` with the interpreter so its allocation callback can
/// record into it without borrowing the `Service`.
pub struct MemStats {
    counts: [AtomicUsize; ALLOC_KIND_COUNT],
    mem: AtomicUsize,
    limit: AtomicUsize,
}

impl MemStats {
    pub fn new(limit: usize) -> Self {
        Self {
            counts: [
                AtomicUsize::new(0),
                AtomicUsize::new(0),
                AtomicUsize::new(0),
                AtomicUsize::new(0),
                AtomicUsize::new(0),
                AtomicUsize::new(0),
            ],
            mem: AtomicUsize::new(0),
            limit: AtomicUsize::new(limit),
        }
    }

    pub fn mem(&self) -> usize {
        self.mem.load(Ordering::Relaxed)
    }

    pub fn limit(&self) -> usize {
        self.limit.load(Ordering::Relaxed)
    }

    /// Sets a new soft limit (0 = unlimited), returning the previous one.
    pub fn set_limit(&self, limit: usize) -> usize {
        self.limit.swap(limit, Ordering::Relaxed)
    }

    pub fn count(&self, kind: AllocKind) -> usize {
        self.counts[kind as usize].load(Ordering::Relaxed)
    }

    fn over_limit(&self) -> bool {
        let limit = self.limit();
        limit != 0 && self.mem() > limit
    }

    /// Accounts a brand-new allocation of `nsize` bytes tagged `kind`.
    /// Returns `false` (and records nothing) if it would exceed the limit.
    pub fn track_alloc(&self, kind: AllocKind, nsize: usize) -> bool {
        if self.over_limit() {
            return false;
        }
        self.counts[kind as usize].fetch_add(1, Ordering::Relaxed);
        self.mem.fetch_add(nsize, Ordering::Relaxed);
        true
    }

    /// Accounts a resize from `osize` to `nsize`. Growth is rejected once
    /// over limit; shrinking is always allowed.
    pub fn track_realloc(&self, osize: usize, nsize: usize) -> bool {
        if nsize > osize && self.over_limit() {
            return false;
        }
        self.mem.fetch_add(nsize, Ordering::Relaxed);
        self.mem.fetch_sub(osize, Ordering::Relaxed);
        true
    }

    /// Accounts a free of `osize` bytes.
    pub fn track_free(&self, osize: usize) {
        self.mem.fetch_sub(osize, Ordering::Relaxed);
    }
}

/// Outcome of a [`Service::resume`] call.
#[derive(Debug)]
pub enum ResumeOutcome {
    Yield,
    Done,
    Error(String),
}

/// A single service: an interpreter instance plus the inbox/outbox/receipt
/// channels the scheduler routes messages through.
pub struct Service {
    id: ServiceId,
    interpreter: SpinLock<Option<Box<dyn Interpreter>>>,
    inbox: RingQueue<Message>,
    outbox: SpinLock<Option<Message>>,
    receipt: SpinLock<Receipt>,
    status: AtomicU8,
    binding: AtomicUsize,
    sockevent: AtomicUsize,
    label: SpinLock<String>,
    stats: Arc<MemStats>,
    cpucost_ns: AtomicU64,
    last_resume_ns: AtomicU64,
}

impl Service {
    pub(crate) fn new(id: ServiceId, inbox_capacity: usize) -> Self {
        Self {
            id,
            interpreter: SpinLock::new(None),
            inbox: RingQueue::new(inbox_capacity),
            outbox: SpinLock::new(None),
            receipt: SpinLock::new(Receipt::EMPTY),
            status: AtomicU8::new(ServiceStatus::Uninitialized as u8),
            binding: AtomicUsize::new(NONE_SENTINEL),
            sockevent: AtomicUsize::new(NONE_SENTINEL),
            label: SpinLock::new(String::new()),
            stats: Arc::new(MemStats::new(0)),
            cpucost_ns: AtomicU64::new(0),
            last_resume_ns: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> ServiceId {
        self.id
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn set_status(&self, status: ServiceStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    pub fn is_dead(&self) -> bool {
        self.status() == ServiceStatus::Dead
    }

    pub fn set_label(&self, label: &str) {
        let mut truncated = label.to_string();
        truncated.truncate(LABEL_MAX);
        *self.label.lock() = truncated;
    }

    pub fn label(&self) -> String {
        self.label.lock().clone()
    }

    pub fn memlimit(&self, limit: usize) -> usize {
        self.stats.set_limit(limit)
    }

    pub fn memcount(&self, kind: AllocKind) -> usize {
        self.stats.count(kind)
    }

    pub fn mem(&self) -> usize {
        self.stats.mem()
    }

    pub fn stats(&self) -> Arc<MemStats> {
        Arc::clone(&self.stats)
    }

    pub fn binding_get(&self) -> Option<usize> {
        match self.binding.load(Ordering::Acquire) {
            NONE_SENTINEL => None,
            w => Some(w),
        }
    }

    pub fn binding_set(&self, worker: Option<usize>) {
        self.binding.store(worker.unwrap_or(NONE_SENTINEL), Ordering::Release);
    }

    pub fn sockevent_get(&self) -> Option<usize> {
        match self.sockevent.load(Ordering::Acquire) {
            NONE_SENTINEL => None,
            i => Some(i),
        }
    }

    pub fn sockevent_init(&self, index: usize) {
        self.sockevent.store(index, Ordering::Release);
    }

    /// Cumulative CPU time this service's interpreter has consumed across
    /// all resumes so far, in nanoseconds.
    pub fn cpucost(&self) -> u64 {
        self.cpucost_ns.load(Ordering::Relaxed)
    }

    pub fn last_resume_ns(&self) -> u64 {
        self.last_resume_ns.load(Ordering::Relaxed)
    }

    /// Creates the interpreter, publishes the bootstrap key, opens the
    /// standard library surface and switches on generational GC. Does not
    /// change `status` — that only happens once `load_source` compiles
    /// something for it to run.
    ///
    /// Takes `self` behind its owning `Arc` rather than `&self`: the
    /// factory hands the interpreter a handle back to this service (so
    /// host-exposed functions can reach its inbox/outbox/stats), and that
    /// handle has to be a clone of the same `Arc` every other holder (the
    /// pool, a worker) shares.
    pub fn init(self: &Arc<Self>, factory: &dyn InterpreterFactory, bootstrap: &[u8]) -> ServiceResult<()> {
        if self.status() != ServiceStatus::Uninitialized {
            return Err(ServiceError::interp_init("service already initialized"));
        }
        let mut interp = factory.create(Arc::clone(self));
        interp.set_registry(BOOTSTRAP_KEY, bootstrap.to_vec());
        interp.open_stdlibs();
        interp.set_generational_gc();
        *self.interpreter.lock() = Some(interp);
        Ok(())
    }

    /// Compiles `code` into the interpreter's top-level coroutine.
    pub fn load_source(&self, code: &[u8], chunk_name: &str) -> ServiceResult<()> {
        let mut guard = self.interpreter.lock();
        let interp = guard.as_mut().ok_or_else(|| ServiceError::interp_init("init service first"))?;
        match interp.compile(code, chunk_name) {
            Ok(()) => {
                self.set_status(ServiceStatus::Idle);
                Ok(())
            }
            Err(message) => {
                self.set_status(ServiceStatus::Dead);
                Err(ServiceError::interp_compile(message))
            }
        }
    }

    /// Resumes the interpreter's top-level coroutine with zero arguments,
    /// accounting CPU time and transitioning status on terminal outcomes.
    /// Only `Yield` leaves the service alive; a normal completion is, for a
    /// coroutine-based embedding, indistinguishable from "nothing left to
    /// do" and is treated the same as an error for scheduling purposes
    /// (see DESIGN.md's resolution of this open question).
    ///
    /// `crashlog`, if set, receives one `<label>: <error>\n<backtrace>\n`
    /// record when the interpreter raises.
    pub fn resume(&self, crashlog: Option<&CrashLogSink>) -> ResumeOutcome {
        let start = thread_cpu_ns();
        self.last_resume_ns.store(start, Ordering::Relaxed);
        let outcome = {
            let mut guard = self.interpreter.lock();
            match guard.as_mut() {
                Some(interp) => interp.resume(),
                None => InterpResumeOutcome::Error("service has no interpreter".to_string()),
            }
        };
        let end = thread_cpu_ns();
        self.cpucost_ns.fetch_add(end.saturating_sub(start), Ordering::Relaxed);

        match outcome {
            InterpResumeOutcome::Yield => ResumeOutcome::Yield,
            InterpResumeOutcome::Ok => {
                self.set_status(ServiceStatus::Dead);
                ResumeOutcome::Done
            }
            InterpResumeOutcome::Error(message) => {
                let mut buf = [0u8; 2048];
                let n = self.interpreter.lock().as_ref().map_or(0, |i| i.backtrace(&mut buf));
                let backtrace = String::from_utf8_lossy(&buf[..n]).into_owned();
                let label = self.label();
                svc_core::serror!("service {} ({}) error: {}\n{}", self.id, label, message, backtrace);
                if let Some(sink) = crashlog {
                    if let Err(e) = sink.record(&label, &message, &backtrace) {
                        svc_core::swarn!("crashlog write failed: {}", e);
                    }
                }
                self.set_status(ServiceStatus::Dead);
                ResumeOutcome::Error(format!("{message}\n{backtrace}"))
            }
        }
    }

    /// Renders a backtrace of the interpreter's currently running coroutine
    /// into `buf`. Returns the number of bytes written.
    pub fn backtrace(&self, buf: &mut [u8]) -> usize {
        self.interpreter.lock().as_ref().map_or(0, |i| i.backtrace(buf))
    }

    /// Enqueues `msg` into the inbox. `-1` (dead), `1` (full), `0`
    /// (accepted), matching the original's tri-state return.
    pub fn push_message(&self, msg: Message) -> i32 {
        if self.is_dead() {
            return -1;
        }
        match self.inbox.push(msg) {
            Ok(()) => 0,
            Err(_) => 1,
        }
    }

    pub fn inbox_len(&self) -> usize {
        self.inbox.len()
    }

    /// Publishes `msg` to the outbox. Fails if one is already pending.
    pub fn send_message(&self, msg: Message) -> ServiceResult<()> {
        let mut guard = self.outbox.lock();
        if guard.is_some() {
            return Err(ServiceError::outbox_busy());
        }
        *guard = Some(msg);
        Ok(())
    }

    /// Takes the outbox slot, if any.
    pub fn message_out(&self) -> Option<Message> {
        self.outbox.lock().take()
    }

    /// Writes a receipt from the scheduler back to this service. Overwriting
    /// a still-unread receipt drops the prior bounce and logs a warning,
    /// matching the original's `service_write_receipt`.
    pub fn write_receipt(&self, kind: ReceiptKind, bounce: Option<Message>) {
        let mut guard = self.receipt.lock();
        if guard.kind != ReceiptKind::None {
            svc_core::swarn!("service {}: overwriting unread receipt {:?}", self.id, guard.kind);
        }
        *guard = Receipt::new(kind, bounce);
    }

    /// Takes the pending receipt, resetting the slot to `None`.
    pub fn read_receipt(&self) -> Receipt {
        let mut guard = self.receipt.lock();
        std::mem::replace(&mut *guard, Receipt::EMPTY)
    }

    /// Pops the next message to process: a bounce carried alongside a
    /// receipt takes priority over the normal inbox.
    pub fn pop_message(&self) -> Option<Message> {
        {
            let mut guard = self.receipt.lock();
            if guard.bounce.is_some() {
                return guard.bounce.take();
            }
        }
        self.inbox.pop()
    }

    pub fn has_message(&self) -> bool {
        self.receipt.lock().bounce.is_some() || !self.inbox.is_empty()
    }

    /// Publishes a zero-payload `Signal` to the root service into this
    /// service's outbox, dropping any message already pending there.
    pub fn send_signal(&self) {
        let msg = Message::signal(self.id, ServiceId::ROOT, 0);
        *self.outbox.lock() = Some(msg);
    }

    /// Closes the interpreter and marks the service `Dead`, keeping its
    /// slot in the pool until `delete` is called.
    pub fn close(&self) {
        self.interpreter.lock().take();
        self.set_status(ServiceStatus::Dead);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::mock;
    use svc_core::MessageType;

    fn svc(id: u32) -> Arc<Service> {
        Arc::new(Service::new(ServiceId::from_raw(id), 4))
    }

    #[test]
    fn starts_uninitialized() {
        let s = svc(2);
        assert_eq!(s.status(), ServiceStatus::Uninitialized);
    }

    #[test]
    fn init_does_not_change_status() {
        let s = svc(2);
        s.init(&mock::forever_yielding(), b"boot").unwrap();
        assert_eq!(s.status(), ServiceStatus::Uninitialized);
    }

    #[test]
    fn double_init_fails() {
        let s = svc(2);
        s.init(&mock::forever_yielding(), b"boot").unwrap();
        assert!(s.init(&mock::forever_yielding(), b"boot").is_err());
    }

    #[test]
    fn load_source_transitions_to_idle() {
        let s = svc(2);
        s.init(&mock::forever_yielding(), b"boot").unwrap();
        s.load_source(b"", "chunk").unwrap();
        assert_eq!(s.status(), ServiceStatus::Idle);
    }

    #[test]
    fn resume_yield_keeps_service_alive() {
        let s = svc(2);
        s.init(&mock::forever_yielding(), b"boot").unwrap();
        s.load_source(b"", "chunk").unwrap();
        assert!(matches!(s.resume(None), ResumeOutcome::Yield));
        assert_eq!(s.status(), ServiceStatus::Idle);
    }

    #[test]
    fn resume_completion_marks_dead() {
        let s = svc(2);
        s.init(&mock::yields_n_then_done(0), b"boot").unwrap();
        s.load_source(b"", "chunk").unwrap();
        assert!(matches!(s.resume(None), ResumeOutcome::Done));
        assert_eq!(s.status(), ServiceStatus::Dead);
    }

    #[test]
    fn resume_error_marks_dead_and_reports_message() {
        let s = svc(2);
        s.init(&mock::always_errors("boom"), b"boot").unwrap();
        s.load_source(b"", "chunk").unwrap();
        match s.resume(None) {
            ResumeOutcome::Error(msg) => assert!(msg.starts_with("boom")),
            other => panic!("expected error, got {other:?}"),
        }
        assert_eq!(s.status(), ServiceStatus::Dead);
    }

    #[test]
    fn push_message_rejects_when_dead() {
        let s = svc(2);
        s.close();
        let m = Message::new(ServiceId::from_raw(1), s.id(), 0, MessageType::Request, None);
        assert_eq!(s.push_message(m), -1);
    }

    #[test]
    fn push_message_reports_full() {
        let s = svc(2);
        // Inbox capacity is 4, but a size-N ring holds only N-1 items (see
        // `RingQueue::push`), so the third push already fills it.
        for _ in 0..3 {
            let m = Message::new(ServiceId::from_raw(1), s.id(), 0, MessageType::Request, None);
            assert_eq!(s.push_message(m), 0);
        }
        let m = Message::new(ServiceId::from_raw(1), s.id(), 0, MessageType::Request, None);
        assert_eq!(s.push_message(m), 1);
    }

    #[test]
    fn send_message_then_take_round_trips() {
        let s = svc(2);
        let m = Message::new(s.id(), ServiceId::from_raw(3), 1, MessageType::Request, Some(b"ping".to_vec()));
        s.send_message(m).unwrap();
        assert!(s.message_out().is_some());
        assert!(s.message_out().is_none());
    }

    #[test]
    fn send_message_fails_while_outbox_busy() {
        let s = svc(2);
        let m1 = Message::new(s.id(), ServiceId::from_raw(3), 1, MessageType::Request, None);
        let m2 = Message::new(s.id(), ServiceId::from_raw(3), 2, MessageType::Request, None);
        s.send_message(m1).unwrap();
        assert!(s.send_message(m2).is_err());
    }

    #[test]
    fn write_receipt_over_unread_drops_prior_bounce() {
        let s = svc(2);
        let bounce1 = Message::new(ServiceId::from_raw(9), s.id(), 0, MessageType::Response, None);
        let bounce2 = Message::new(ServiceId::from_raw(9), s.id(), 1, MessageType::Response, None);
        s.write_receipt(ReceiptKind::Response, Some(bounce1));
        s.write_receipt(ReceiptKind::Done, Some(bounce2));
        let r = s.read_receipt();
        assert_eq!(r.kind, ReceiptKind::Done);
        assert_eq!(r.bounce.unwrap().session, 1);
    }

    #[test]
    fn pop_message_prefers_bounce_over_inbox() {
        let s = svc(2);
        let inbox_msg = Message::new(ServiceId::from_raw(1), s.id(), 0, MessageType::Request, None);
        s.push_message(inbox_msg);
        let bounce = Message::new(ServiceId::from_raw(9), s.id(), 7, MessageType::Response, None);
        s.write_receipt(ReceiptKind::Response, Some(bounce));
        let popped = s.pop_message().unwrap();
        assert_eq!(popped.session, 7);
        let next = s.pop_message().unwrap();
        assert_eq!(next.session, 0);
    }

    #[test]
    fn send_signal_overwrites_pending_outbox() {
        let s = svc(2);
        let m = Message::new(s.id(), ServiceId::from_raw(3), 0, MessageType::Request, None);
        s.send_message(m).unwrap();
        s.send_signal();
        let out = s.message_out().unwrap();
        assert_eq!(out.kind, MessageType::Signal);
        assert_eq!(out.to, ServiceId::ROOT);
    }

    #[test]
    fn memstats_rejects_growth_over_limit() {
        let stats = MemStats::new(16);
        assert!(stats.track_alloc(AllocKind::Table, 10));
        assert!(!stats.track_alloc(AllocKind::Table, 10));
        assert_eq!(stats.mem(), 10);
    }

    #[test]
    fn memstats_allows_shrink_over_limit() {
        let stats = MemStats::new(8);
        stats.track_alloc(AllocKind::String, 8);
        assert!(stats.track_realloc(8, 4));
        assert_eq!(stats.mem(), 4);
    }

    #[test]
    fn close_marks_dead_and_drops_interpreter() {
        let s = svc(2);
        s.init(&mock::forever_yielding(), b"boot").unwrap();
        s.close();
        assert!(s.is_dead());
        assert_eq!(s.push_message(Message::new(ServiceId::from_raw(1), s.id(), 0, MessageType::Request, None)), -1);
    }
}
