//! Runtime configuration.
//!
//! Provides compile-time defaults with environment variable overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Environment variables (runtime)
//! 2. Library defaults
//!
//! ```rust,ignore
//! use svc_runtime::config::RuntimeConfig;
//!
//! let config = RuntimeConfig::from_env();
//! let config = RuntimeConfig::new().worker(8).queue(8192);
//! ```

use std::path::PathBuf;
use std::time::Duration;
use svc_core::env::{env_get, env_get_opt};

mod defaults {
    /// Falls back to 4 if the platform can't report parallelism.
    pub fn worker() -> usize {
        std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
    }

    pub const QUEUE: usize = 4096;
    pub const QUEUE_SENDING: usize = 4096;
    pub const MAX_SERVICE: usize = 65536;
    pub const EXTERNAL_QUEUE: usize = 256;
    pub const IDLE_PARK_TIMEOUT_MS: u64 = 1000;
}

/// Process-wide scheduler configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Number of worker threads (1..=256).
    pub worker: usize,
    /// Inbox capacity per service (rounded to a power of two).
    pub queue: usize,
    /// Outbound routing queue capacity (rounded to a power of two).
    pub queue_sending: usize,
    /// Maximum concurrent services (rounded to a power of two).
    pub max_service: usize,
    /// Capacity of the external-wakeup queue.
    pub external_queue: usize,
    /// Path to append `<label>: <error>\n<backtrace>\n` crash records to.
    pub crashlog: Option<PathBuf>,
    /// Scheduler idle-wait cap before falling back to a short sleep.
    pub idle_park_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl RuntimeConfig {
    /// Compile-time defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `SVCRT_WORKER` - number of worker threads
    /// - `SVCRT_QUEUE` - per-service inbox capacity
    /// - `SVCRT_QUEUE_SENDING` - outbound routing queue capacity
    /// - `SVCRT_MAX_SERVICE` - maximum concurrent services
    /// - `SVCRT_EXTERNAL_QUEUE` - external wakeup queue capacity
    /// - `SVCRT_CRASHLOG` - path for crash log records
    /// - `SVCRT_IDLE_PARK_TIMEOUT_MS` - scheduler idle wait cap
    pub fn from_env() -> Self {
        Self {
            worker: env_get("SVCRT_WORKER", defaults::worker()),
            queue: env_get("SVCRT_QUEUE", defaults::QUEUE),
            queue_sending: env_get("SVCRT_QUEUE_SENDING", defaults::QUEUE_SENDING),
            max_service: env_get("SVCRT_MAX_SERVICE", defaults::MAX_SERVICE),
            external_queue: env_get("SVCRT_EXTERNAL_QUEUE", defaults::EXTERNAL_QUEUE),
            crashlog: env_get_opt::<String>("SVCRT_CRASHLOG").map(PathBuf::from),
            idle_park_timeout: Duration::from_millis(env_get(
                "SVCRT_IDLE_PARK_TIMEOUT_MS",
                defaults::IDLE_PARK_TIMEOUT_MS,
            )),
        }
    }

    /// Explicit defaults, no environment override. Useful for tests.
    pub fn new() -> Self {
        Self {
            worker: defaults::worker(),
            queue: defaults::QUEUE,
            queue_sending: defaults::QUEUE_SENDING,
            max_service: defaults::MAX_SERVICE,
            external_queue: defaults::EXTERNAL_QUEUE,
            crashlog: None,
            idle_park_timeout: Duration::from_millis(defaults::IDLE_PARK_TIMEOUT_MS),
        }
    }

    pub fn worker(mut self, n: usize) -> Self {
        self.worker = n;
        self
    }

    pub fn queue(mut self, n: usize) -> Self {
        self.queue = n;
        self
    }

    pub fn queue_sending(mut self, n: usize) -> Self {
        self.queue_sending = n;
        self
    }

    pub fn max_service(mut self, n: usize) -> Self {
        self.max_service = n;
        self
    }

    pub fn external_queue(mut self, n: usize) -> Self {
        self.external_queue = n;
        self
    }

    pub fn crashlog(mut self, path: impl Into<PathBuf>) -> Self {
        self.crashlog = Some(path.into());
        self
    }

    pub fn idle_park_timeout(mut self, d: Duration) -> Self {
        self.idle_park_timeout = d;
        self
    }

    /// Validate the configuration, returning a `ServiceError` describing
    /// the first violation found.
    pub fn validate(&self) -> svc_core::ServiceResult<()> {
        if self.worker == 0 {
            return Err(svc_core::ServiceError::config_invalid("worker must be > 0"));
        }
        if self.worker > 256 {
            return Err(svc_core::ServiceError::config_invalid("worker must be <= 256"));
        }
        if self.queue < 2 || !self.queue.is_power_of_two() {
            return Err(svc_core::ServiceError::config_invalid(
                "queue must be a power of two >= 2",
            ));
        }
        if self.max_service < 2 || !self.max_service.is_power_of_two() {
            return Err(svc_core::ServiceError::config_invalid(
                "max_service must be a power of two >= 2",
            ));
        }
        if let Some(path) = &self.crashlog {
            if path.as_os_str().len() > 127 {
                return Err(svc_core::ServiceError::config_invalid(
                    "crashlog path must be <= 127 bytes",
                ));
            }
        }
        Ok(())
    }

    pub fn print(&self) {
        eprintln!("RuntimeConfig:");
        eprintln!("  worker:             {}", self.worker);
        eprintln!("  queue:              {}", self.queue);
        eprintln!("  queue_sending:      {}", self.queue_sending);
        eprintln!("  max_service:        {}", self.max_service);
        eprintln!("  external_queue:     {}", self.external_queue);
        eprintln!("  crashlog:           {:?}", self.crashlog);
        eprintln!("  idle_park_timeout:  {:?}", self.idle_park_timeout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_env_has_sane_defaults() {
        let config = RuntimeConfig::from_env();
        assert!(config.worker >= 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_overrides_fields() {
        let config = RuntimeConfig::new().worker(8).queue(8192);
        assert_eq!(config.worker, 8);
        assert_eq!(config.queue, 8192);
    }

    #[test]
    fn validate_rejects_zero_workers() {
        assert!(RuntimeConfig::new().worker(0).validate().is_err());
    }

    #[test]
    fn validate_rejects_too_many_workers() {
        assert!(RuntimeConfig::new().worker(1000).validate().is_err());
    }

    #[test]
    fn validate_rejects_non_pow2_queue() {
        assert!(RuntimeConfig::new().queue(100).validate().is_err());
    }
}
