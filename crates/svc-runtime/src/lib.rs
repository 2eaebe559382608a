//! # svc-runtime
//!
//! The platform-specific half of the service scheduler: worker parking,
//! the self-pipe external-wakeup event, the hierarchical timing wheel, the
//! per-service interpreter/message state, the fixed-size service pool, and
//! the central scheduler loop that ties them together.
//!
//! `svc-core` supplies the platform-agnostic pieces (ids, messages, the
//! SPSC ring, the structured error type); this crate supplies everything
//! that needs an OS thread, a clock, or a socket.

#![allow(dead_code)]

pub mod config;
pub mod crashlog;
pub mod external_event;
pub mod interpreter;
pub mod parking;
pub mod pool;
pub mod scheduler;
pub mod service;
pub mod timer;
pub mod worker;

pub use config::RuntimeConfig;
pub use crashlog::CrashLogSink;
pub use external_event::ExternalEvent;
pub use interpreter::{Interpreter, InterpreterFactory, ResumeOutcome};
pub use parking::{CondvarParking, Parking};
pub use pool::ServicePool;
pub use scheduler::{ScheduleNewHook, Scheduler};
pub use service::{AllocKind, MemStats, Service, ServiceStatus};
pub use timer::{thread_cpu_ns, TimeSource, TimingWheel};
pub use worker::Worker;

#[cfg(target_os = "linux")]
pub use parking::FutexParking;
