//! Structured error type for the service runtime, built on `gerror`.
//!
//! Hot-path kinds (inbox full, dead destination, double outbox publish)
//! construct a zero-allocation `GError::simple`; setup-time and fatal
//! kinds (worker spawn failure, config validation) go through `err!` to
//! pick up a message, file, and line.

use gerror::codes::*;
use gerror::{err, GError};
use std::fmt;

#[derive(Debug)]
pub struct ServiceError(GError);

pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    pub fn inner(&self) -> &GError {
        &self.0
    }

    pub fn pool_exhausted() -> Self {
        ServiceError(GError::simple(SYS_SVC_POOL, ERR_SVC_POOL_EXHAUSTED, UC_SVC_PUSH))
    }

    pub fn dest_dead() -> Self {
        ServiceError(GError::simple(SYS_SVC_RUNTIME, ERR_SVC_DEST_DEAD, UC_SVC_SEND))
    }

    pub fn dest_missing() -> Self {
        ServiceError(GError::simple(SYS_SVC_RUNTIME, ERR_SVC_DEST_MISSING, UC_SVC_SEND))
    }

    pub fn inbox_full() -> Self {
        ServiceError(GError::simple(SYS_SVC_RUNTIME, ERR_SVC_INBOX_FULL, UC_SVC_PUSH))
    }

    pub fn outbox_busy() -> Self {
        ServiceError(GError::simple(SYS_SVC_RUNTIME, ERR_SVC_OUTBOX_BUSY, UC_SVC_SEND))
    }

    pub fn oom() -> Self {
        ServiceError(GError::simple(SYS_SVC_POOL, ERR_SVC_OOM, UC_SVC_PUSH))
    }

    pub fn interp_init(message: impl Into<String>) -> Self {
        let message = message.into();
        ServiceError(err!(SYS_SVC_POOL, SUB_SVC_INTERP, ERR_SVC_INTERP_INIT, UC_SVC_RESUME, message))
    }

    pub fn interp_compile(message: impl Into<String>) -> Self {
        let message = message.into();
        ServiceError(err!(SYS_SVC_POOL, SUB_SVC_INTERP, ERR_SVC_INTERP_COMPILE, UC_SVC_RESUME, message))
    }

    pub fn interp_resume(message: impl Into<String>) -> Self {
        let message = message.into();
        ServiceError(err!(SYS_SVC_POOL, SUB_SVC_INTERP, ERR_SVC_INTERP_RESUME, UC_SVC_RESUME, message))
    }

    pub fn wheel_clock_regression() -> Self {
        ServiceError(GError::simple(SYS_SVC_TIMER, ERR_SVC_WHEEL_CLOCK_BACK, UC_SVC_RESUME))
    }

    pub fn worker_spawn(message: impl Into<String>) -> Self {
        let message = message.into();
        ServiceError(err!(SYS_SVC_RUNTIME, SUB_SVC_WORKER, ERR_SVC_WORKER_SPAWN, UC_SVC_RESUME, message))
    }

    pub fn config_invalid(message: impl Into<String>) -> Self {
        let message = message.into();
        ServiceError(err!(SYS_SVC_RUNTIME, SUB_SVC_SCHEDULER, ERR_SVC_CONFIG_INVALID, UC_SVC_RESUME, message))
    }

    pub fn sockevent_setup(message: impl Into<String>) -> Self {
        let message = message.into();
        ServiceError(err!(SYS_SVC_RUNTIME, SUB_SVC_SOCKEVENT, ERR_SVC_SOCKEVENT_SETUP, UC_SVC_RESUME, message))
    }

    pub fn id_occupied() -> Self {
        ServiceError(GError::simple(SYS_SVC_POOL, ERR_SVC_ID_OCCUPIED, UC_SVC_NEW))
    }

    pub fn not_closed() -> Self {
        ServiceError(GError::simple(SYS_SVC_POOL, ERR_SVC_NOT_CLOSED, UC_SVC_CLOSE))
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl std::error::Error for ServiceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

impl From<GError> for ServiceError {
    fn from(e: GError) -> Self {
        ServiceError(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_kinds_carry_distinct_codes() {
        assert_ne!(
            ServiceError::inbox_full().inner().error_code(),
            ServiceError::dest_dead().inner().error_code()
        );
    }

    #[test]
    fn full_kinds_carry_message() {
        let e = ServiceError::worker_spawn("thread::Builder::spawn failed");
        assert!(format!("{}", e).len() > 0);
    }
}
