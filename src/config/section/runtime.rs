//! `[runtime]` section configuration.
//!
//! Sizes the evaluation and I/O pools.
//!
//! # Example
//!
//! ```toml
//! [runtime]
//! workers = 4             # Script evaluation threads (0 = one per core)
//! io_threads = 4          # Threads for continuation processors and file reads
//! max_queued_ms = 20000   # Log units that waited longer than this to run
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ConfigError;

/// Evaluation pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Script evaluation threads. `0` picks the number of available cores.
    pub workers: usize,

    /// Threads of the I/O runtime that performs continuation side effects.
    pub io_threads: usize,

    /// Queue-time threshold in milliseconds for the delayed-dispatch warning.
    pub max_queued_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            io_threads: 4,
            max_queued_ms: 20_000,
        }
    }
}

impl ExecutionConfig {
    /// Resolved number of evaluation threads.
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    }

    pub const fn max_queued(&self) -> Duration {
        Duration::from_millis(self.max_queued_ms)
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.io_threads == 0 {
            return Err(ConfigError::Validation(
                "runtime.io_threads must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::test_parse_config;

    #[test]
    fn test_runtime_config() {
        let config = test_parse_config("[runtime]\nworkers = 3\nmax_queued_ms = 50");
        assert_eq!(config.runtime.worker_count(), 3);
        assert_eq!(config.runtime.io_threads, 4);
        assert_eq!(config.runtime.max_queued().as_millis(), 50);
    }

    #[test]
    fn test_zero_workers_uses_available_cores() {
        let config = test_parse_config("");
        assert!(config.runtime.worker_count() >= 1);
    }

    #[test]
    fn test_zero_io_threads_rejected() {
        let config = test_parse_config("[runtime]\nio_threads = 0");
        assert!(config.runtime.validate().is_err());
    }
}
