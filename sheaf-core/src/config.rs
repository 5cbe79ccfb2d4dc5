//! Batching configuration and its bounds.
//!
//! Following TigerStyle: put limits on everything. The batch size and the
//! executor concurrency both have explicit maximums, and every hand-off queue
//! except the caller-facing intake is bounded.

use std::time::Duration;

use crate::{Error, Result};

/// Largest accepted `batch_size`.
pub const MAX_BATCH_SIZE: u32 = 10_000;

/// Largest accepted `executor_concurrency`.
pub const MAX_EXECUTOR_CONCURRENCY: u32 = 1024;

/// Largest accepted `batch_timeout`.
pub const MAX_BATCH_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Largest accepted `backend_call_timeout`.
pub const MAX_BACKEND_CALL_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Configuration for a batching coordinator.
///
/// Supplied once at startup; nothing here changes at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    /// Close a batch once it holds this many requests.
    pub batch_size: u32,
    /// Close a batch this long after its first request arrived.
    pub batch_timeout: Duration,
    /// Maximum number of backend calls running at once.
    pub executor_concurrency: u32,
    /// Deadline for a single backend call, independent of caller contexts.
    pub backend_call_timeout: Duration,
    /// Intake queue capacity. `None` means unbounded.
    pub intake_capacity: Option<u32>,
    /// Closed batches allowed to wait for an executor slot.
    pub ready_batch_capacity: u32,
}

impl BatchConfig {
    /// Creates a configuration with the default values.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            batch_size: 7,
            batch_timeout: Duration::from_millis(10),
            executor_concurrency: 2,
            backend_call_timeout: Duration::from_secs(10),
            intake_capacity: None,
            ready_batch_capacity: 64,
        }
    }

    /// Creates a configuration suitable for testing (short timeouts).
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            batch_size: 4,
            batch_timeout: Duration::from_millis(5),
            executor_concurrency: 2,
            backend_call_timeout: Duration::from_secs(1),
            intake_capacity: None,
            ready_batch_capacity: 16,
        }
    }

    /// Creates the default configuration with environment overrides applied.
    ///
    /// Reads `SHEAF_BATCH_SIZE`, `SHEAF_BATCH_TIMEOUT_MS`,
    /// `SHEAF_EXECUTOR_CONCURRENCY` and `SHEAF_BACKEND_TIMEOUT_MS`.
    /// Values that fail to parse are ignored.
    #[must_use]
    pub fn from_env() -> Self {
        fn var<T: std::str::FromStr>(name: &str) -> Option<T> {
            std::env::var(name).ok().and_then(|v| v.parse().ok())
        }

        let mut config = Self::new();
        if let Some(size) = var::<u32>("SHEAF_BATCH_SIZE") {
            config.batch_size = size;
        }
        if let Some(ms) = var::<u64>("SHEAF_BATCH_TIMEOUT_MS") {
            config.batch_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = var::<u32>("SHEAF_EXECUTOR_CONCURRENCY") {
            config.executor_concurrency = n;
        }
        if let Some(ms) = var::<u64>("SHEAF_BACKEND_TIMEOUT_MS") {
            config.backend_call_timeout = Duration::from_millis(ms);
        }
        config
    }

    /// Sets the size trigger.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the time trigger.
    #[must_use]
    pub const fn with_batch_timeout(mut self, batch_timeout: Duration) -> Self {
        self.batch_timeout = batch_timeout;
        self
    }

    /// Sets the executor concurrency limit.
    #[must_use]
    pub const fn with_executor_concurrency(mut self, executor_concurrency: u32) -> Self {
        self.executor_concurrency = executor_concurrency;
        self
    }

    /// Sets the per-batch backend call timeout.
    #[must_use]
    pub const fn with_backend_call_timeout(mut self, backend_call_timeout: Duration) -> Self {
        self.backend_call_timeout = backend_call_timeout;
        self
    }

    /// Bounds the intake queue. Callers then wait for room when it is full.
    #[must_use]
    pub const fn with_intake_capacity(mut self, capacity: u32) -> Self {
        self.intake_capacity = Some(capacity);
        self
    }

    /// Sets how many closed batches may wait for an executor slot.
    #[must_use]
    pub const fn with_ready_batch_capacity(mut self, capacity: u32) -> Self {
        self.ready_batch_capacity = capacity;
        self
    }

    /// Validates that all values are within bounds.
    ///
    /// # Errors
    /// Returns `Error::InvalidConfig` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig {
                name: "batch_size",
                reason: "must be positive",
            });
        }
        if self.batch_size > MAX_BATCH_SIZE {
            return Err(Error::InvalidConfig {
                name: "batch_size",
                reason: "must be <= MAX_BATCH_SIZE",
            });
        }
        if self.batch_timeout.is_zero() {
            return Err(Error::InvalidConfig {
                name: "batch_timeout",
                reason: "must be positive",
            });
        }
        if self.batch_timeout > MAX_BATCH_TIMEOUT {
            return Err(Error::InvalidConfig {
                name: "batch_timeout",
                reason: "must be <= MAX_BATCH_TIMEOUT",
            });
        }
        if self.executor_concurrency == 0 {
            return Err(Error::InvalidConfig {
                name: "executor_concurrency",
                reason: "must be positive",
            });
        }
        if self.executor_concurrency > MAX_EXECUTOR_CONCURRENCY {
            return Err(Error::InvalidConfig {
                name: "executor_concurrency",
                reason: "must be <= MAX_EXECUTOR_CONCURRENCY",
            });
        }
        if self.backend_call_timeout.is_zero() {
            return Err(Error::InvalidConfig {
                name: "backend_call_timeout",
                reason: "must be positive",
            });
        }
        if self.backend_call_timeout > MAX_BACKEND_CALL_TIMEOUT {
            return Err(Error::InvalidConfig {
                name: "backend_call_timeout",
                reason: "must be <= MAX_BACKEND_CALL_TIMEOUT",
            });
        }
        if self.intake_capacity == Some(0) {
            return Err(Error::InvalidConfig {
                name: "intake_capacity",
                reason: "must be positive when bounded",
            });
        }
        if self.ready_batch_capacity == 0 {
            return Err(Error::InvalidConfig {
                name: "ready_batch_capacity",
                reason: "must be positive",
            });
        }
        Ok(())
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(BatchConfig::new().validate().is_ok());
        assert!(BatchConfig::for_testing().validate().is_ok());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let config = BatchConfig::new().with_batch_size(0);
        assert_eq!(
            config.validate(),
            Err(Error::InvalidConfig {
                name: "batch_size",
                reason: "must be positive",
            })
        );
    }

    #[test]
    fn test_batch_size_one_is_pass_through() {
        assert!(BatchConfig::new().with_batch_size(1).validate().is_ok());
    }

    #[test]
    fn test_oversized_batch_rejected() {
        let config = BatchConfig::new().with_batch_size(MAX_BATCH_SIZE + 1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_durations_rejected() {
        let config = BatchConfig::new().with_batch_timeout(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfig { name: "batch_timeout", .. })
        ));

        let config = BatchConfig::new().with_backend_call_timeout(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfig { name: "backend_call_timeout", .. })
        ));
    }

    #[test]
    fn test_oversized_durations_rejected() {
        let config = BatchConfig::new().with_batch_timeout(Duration::MAX);
        assert_eq!(
            config.validate(),
            Err(Error::InvalidConfig {
                name: "batch_timeout",
                reason: "must be <= MAX_BATCH_TIMEOUT",
            })
        );
        assert!(BatchConfig::new()
            .with_batch_timeout(MAX_BATCH_TIMEOUT)
            .validate()
            .is_ok());

        let config = BatchConfig::new().with_backend_call_timeout(Duration::MAX);
        assert_eq!(
            config.validate(),
            Err(Error::InvalidConfig {
                name: "backend_call_timeout",
                reason: "must be <= MAX_BACKEND_CALL_TIMEOUT",
            })
        );
        assert!(BatchConfig::new()
            .with_backend_call_timeout(MAX_BACKEND_CALL_TIMEOUT)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_concurrency_bounds() {
        assert!(BatchConfig::new()
            .with_executor_concurrency(0)
            .validate()
            .is_err());
        assert!(BatchConfig::new()
            .with_executor_concurrency(MAX_EXECUTOR_CONCURRENCY + 1)
            .validate()
            .is_err());
        assert!(BatchConfig::new()
            .with_executor_concurrency(MAX_EXECUTOR_CONCURRENCY)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_bounded_intake_must_be_positive() {
        assert!(BatchConfig::new().with_intake_capacity(0).validate().is_err());
        assert!(BatchConfig::new().with_intake_capacity(1).validate().is_ok());
        assert!(BatchConfig::new()
            .with_ready_batch_capacity(0)
            .validate()
            .is_err());
    }
}
