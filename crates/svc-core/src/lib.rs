//! # svc-core
//!
//! Core types for the service scheduler: the SPSC ring queue, service
//! identifiers, the env-var config helpers, the kernel-style logging
//! macros, and the structured error type.
//!
//! This crate is platform-agnostic. Worker parking, the self-pipe event,
//! the timing wheel and the scheduler loop live in `svc-runtime`.
//!
//! ## Modules
//!
//! - `id` - `ServiceId`
//! - `message` - `Message`, `MessageType`, `Receipt`, `ReceiptKind`
//! - `ring` - wait-free single-producer/single-consumer ring queue
//! - `spinlock` - internal spinlock primitive
//! - `error` - `ServiceError`, wrapping `gerror::GError`
//! - `sprint` - kernel-style leveled logging macros
//! - `env` - environment variable utilities
//!
//! `ServicePool`'s own id allocation (monotonic cursor, linear probing on
//! collision) lives directly on that type in `svc-runtime`; this crate does
//! not carry a separate general-purpose slot allocator.

#![allow(dead_code)]

pub mod env;
pub mod error;
pub mod id;
pub mod message;
pub mod ring;
pub mod spinlock;
#[macro_use]
pub mod sprint;

pub use env::{env_get, env_get_bool, env_get_opt, env_get_str, env_is_set};
pub use error::{ServiceError, ServiceResult};
pub use id::ServiceId;
pub use message::{Message, MessageType, Receipt, ReceiptKind};
pub use ring::RingQueue;
pub use spinlock::SpinLock;

/// Constants shared across the core and runtime crates.
pub mod constants {
    /// Maximum worker threads.
    pub const MAX_WORKERS: usize = 256;

    /// Default maximum concurrent services.
    pub const DEFAULT_MAX_SERVICE: usize = 65536;

    /// Default per-service inbox capacity (must be a power of two).
    pub const DEFAULT_QUEUE: usize = 4096;

    /// Per-worker binding (affinity) queue capacity.
    pub const BINDING_QUEUE_SIZE: usize = 16;

    /// Timing wheel tick granularity, in 0.1ms units: one tick == 0.1ms.
    pub const WHEEL_TICK_US: u64 = 100;

    /// Cache line size for alignment of hot cross-thread fields.
    pub const CACHE_LINE_SIZE: usize = 64;

    /// Root/sentinel service id; service id 0 always means "none".
    pub const SERVICE_ID_NONE: u32 = 0;

    /// Conventional id of the root service (receives schedule-control messages).
    pub const SERVICE_ID_ROOT: u32 = 1;
}
