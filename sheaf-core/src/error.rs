//! Error types for Sheaf operations.
//!
//! Following `TigerStyle`: every caller gets exactly one explicit outcome.
//! Errors are `Clone` because a single backend outcome is fanned out to every
//! member of a batch.

/// The result type for Sheaf operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a caller's context ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelReason {
    /// The context was cancelled explicitly.
    Cancelled,
    /// The context's deadline passed.
    DeadlineExceeded,
}

impl CancelReason {
    /// Returns a short static name for logging.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::DeadlineExceeded => "deadline_exceeded",
        }
    }
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of one aggregate backend call.
///
/// Shared verbatim by every request of the batch that produced it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The backend reported a failure.
    #[error("backend call failed: {message}")]
    Failed {
        /// Backend-provided description.
        message: String,
    },

    /// The backend did not finish within the batch call timeout.
    #[error("backend call timed out after {waited_us}us")]
    TimedOut {
        /// How long the executor waited (in microseconds).
        waited_us: u64,
    },

    /// The backend panicked while executing the batch.
    #[error("backend panicked: {message}")]
    Panicked {
        /// Panic payload, when it was a string.
        message: String,
    },
}

impl BackendError {
    /// Creates a `Failed` error from any displayable message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// Returns true if this error is the executor's own timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }
}

/// Errors returned to callers of the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The caller's context ended before the request was accepted.
    /// The request never joined a batch.
    #[error("call cancelled before submission: {reason}")]
    SubmissionCancelled {
        /// How the context ended.
        reason: CancelReason,
    },

    /// The caller's context ended while waiting for the batch outcome.
    /// The request still runs with its batch.
    #[error("call cancelled while awaiting result: {reason}")]
    CallerCancelled {
        /// How the context ended.
        reason: CancelReason,
    },

    /// The batch containing this request failed.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The coordinator no longer accepts requests.
    #[error("coordinator is shut down")]
    Shutdown,

    /// A configuration value was rejected.
    #[error("invalid configuration '{name}': {reason}")]
    InvalidConfig {
        /// The offending field.
        name: &'static str,
        /// Why it was invalid.
        reason: &'static str,
    },
}

impl Error {
    /// Returns true if the error came from the caller's own context.
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(
            self,
            Self::SubmissionCancelled { .. } | Self::CallerCancelled { .. }
        )
    }

    /// Returns the cancellation reason, if this is a cancellation.
    #[must_use]
    pub const fn cancel_reason(&self) -> Option<CancelReason> {
        match self {
            Self::SubmissionCancelled { reason } | Self::CallerCancelled { reason } => {
                Some(*reason)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Backend(BackendError::TimedOut {
            waited_us: 5_000_000,
        });
        assert_eq!(format!("{err}"), "backend call timed out after 5000000us");
    }

    #[test]
    fn test_cancellation_classification() {
        let before = Error::SubmissionCancelled {
            reason: CancelReason::Cancelled,
        };
        let after = Error::CallerCancelled {
            reason: CancelReason::DeadlineExceeded,
        };
        assert!(before.is_cancellation());
        assert!(after.is_cancellation());
        assert_eq!(after.cancel_reason(), Some(CancelReason::DeadlineExceeded));

        let backend: Error = BackendError::failed("connection reset").into();
        assert!(!backend.is_cancellation());
        assert_eq!(backend.cancel_reason(), None);
        assert!(format!("{backend}").contains("connection reset"));
    }
}
