//! Crash log sink: appends `<label>: <error>\n<backtrace>\n` records for
//! fatal service errors, per the runtime's `crashlog` configuration option.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use svc_core::{ServiceError, ServiceResult};

pub struct CrashLogSink {
    path: PathBuf,
}

impl CrashLogSink {
    pub fn open(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one crash record. `error` and `backtrace` are written
    /// verbatim; `backtrace` may be empty.
    pub fn record(&self, label: &str, error: &str, backtrace: &str) -> ServiceResult<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| ServiceError::config_invalid(format!("crashlog open {}: {}", self.path.display(), e)))?;
        write!(file, "{label}: {error}\n{backtrace}\n")
            .map_err(|e| ServiceError::config_invalid(format!("crashlog write {}: {}", self.path.display(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_appends_one_entry_per_call() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("svcrt-crashlog-test-{}.log", std::process::id()));
        let sink = CrashLogSink::open(&path);
        sink.record("worker-1", "boom", "chunk:1: in main chunk").unwrap();
        sink.record("worker-2", "bang", "").unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("worker-1: boom"));
        assert!(contents.contains("worker-2: bang"));
        std::fs::remove_file(&path).ok();
    }
}
