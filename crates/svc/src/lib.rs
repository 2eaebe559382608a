//! # svc - cooperative multi-worker service scheduler
//!
//! A fixed pool of opaque, resumable "services" (interpreter coroutines)
//! multiplexed over a small number of OS worker threads, exchanging
//! messages through bounded per-service inboxes. No thread is created per
//! service; a dedicated scheduler thread routes messages, harvests
//! completed work, and dispatches the ready-list onto workers honoring
//! per-service worker affinity.
//!
//! ## Quick start
//!
//! ```ignore
//! use svc::{Runtime, RuntimeConfig};
//!
//! let runtime = Runtime::new(RuntimeConfig::new().worker(4)).unwrap();
//! runtime.start();
//!
//! let id = runtime.spawn_service(&my_factory, b"bootstrap", b"-- source", "main").unwrap();
//! // ... send messages, wait for completion ...
//! runtime.shutdown();
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     Scheduler thread                     │
//! │   harvest outboxes -> harvest done-slots -> dispatch      │
//! │   -> timer tick -> idle-wait on external event             │
//! └──────────────────────────────────────────────────────────┘
//!               │                              │
//!               ▼                              ▼
//!        ┌────────────┐                 ┌────────────┐
//!        │  Worker 0  │       ...       │ Worker N-1 │
//!        │ resume svc │                 │ resume svc │
//!        └────────────┘                 └────────────┘
//!               │                              │
//!               └──────────────┬───────────────┘
//!                               ▼
//!                    ┌────────────────────┐
//!                    │    Service pool     │
//!                    │  inbox/outbox/...   │
//!                    └────────────────────┘
//! ```

pub use svc_core::{
    env_get, env_get_bool, env_get_opt, env_get_str, env_is_set,
    Message, MessageType, Receipt, ReceiptKind, RingQueue, ServiceError, ServiceId, ServiceResult,
};
pub use svc_core::sprint::{init as init_logging, set_flush_enabled, set_log_level, set_time_enabled, LogLevel};
pub use svc_core::{sdebug, serror, sinfo, sprint, sprintln, strace, swarn};

pub use svc_runtime::{
    AllocKind, CondvarParking, CrashLogSink, ExternalEvent, Interpreter, InterpreterFactory, MemStats,
    Parking, ResumeOutcome, RuntimeConfig, ScheduleNewHook, Scheduler, Service, ServicePool,
    ServiceStatus, TimeSource, TimingWheel, Worker,
};

#[cfg(target_os = "linux")]
pub use svc_runtime::FutexParking;

pub mod interpreter {
    pub use svc_runtime::interpreter::mock;
}

/// Runtime handle bundling a [`Scheduler`] over the portable
/// [`CondvarParking`] primitive. Applications that want the Linux futex
/// fast path can build a `Scheduler<FutexParking>` directly instead.
pub struct Runtime {
    scheduler: std::sync::Arc<Scheduler<CondvarParking>>,
}

impl Runtime {
    /// Builds the service pool, worker array, timing wheel and external
    /// event, but does not spawn any threads yet.
    pub fn new(config: RuntimeConfig) -> ServiceResult<Self> {
        let scheduler = Scheduler::new(config, |_| CondvarParking::new())?;
        Ok(Self { scheduler })
    }

    /// Spawns the worker and scheduler threads. A no-op if already started.
    pub fn start(&self) {
        self.scheduler.start();
    }

    /// Requests every worker and the scheduler thread to stop, then joins
    /// them. A no-op if not started.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }

    pub fn scheduler(&self) -> &std::sync::Arc<Scheduler<CondvarParking>> {
        &self.scheduler
    }

    pub fn pool(&self) -> &std::sync::Arc<ServicePool> {
        self.scheduler.pool()
    }

    /// Allocates a service, initializes its interpreter from `factory`,
    /// compiles `code` under `chunk_name`, and marks it ready to run its
    /// first resume. Convenience wrapper around the lower-level
    /// [`ServicePool`]/[`Service`] calls for the common case.
    pub fn spawn_service(
        &self,
        factory: &dyn InterpreterFactory,
        bootstrap: &[u8],
        code: &[u8],
        chunk_name: &str,
    ) -> ServiceResult<ServiceId> {
        let id = self.scheduler.pool().new_service(None)?;
        let svc = self
            .scheduler
            .pool()
            .lookup(id)
            .expect("service just allocated must be present");
        svc.init(factory, bootstrap)?;
        svc.load_source(code, chunk_name)?;
        self.scheduler.enqueue_ready(id);
        Ok(id)
    }

    /// Registers the callback invoked when a service sends a `ScheduleNew`
    /// control message. See [`Scheduler::set_schedule_new_hook`].
    pub fn set_schedule_new_hook(&self, hook: impl Fn(&Message, &ServicePool) + Send + Sync + 'static) {
        self.scheduler.set_schedule_new_hook(hook);
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use interpreter::mock;

    #[test]
    fn spawn_service_runs_to_completion() {
        let runtime = Runtime::new(RuntimeConfig::new().worker(2).queue(8).max_service(16)).unwrap();
        runtime.start();

        let id = runtime
            .spawn_service(&mock::yields_n_then_done(0), b"boot", b"", "chunk")
            .unwrap();

        let start = std::time::Instant::now();
        loop {
            let svc = runtime.pool().lookup(id).unwrap();
            if svc.is_dead() {
                break;
            }
            assert!(start.elapsed() < std::time::Duration::from_secs(2), "service never completed");
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        runtime.shutdown();
    }
}
