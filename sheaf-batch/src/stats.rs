//! Coordinator counters.
//!
//! Shared between the entry point, the batcher and the executor pool. All
//! counters are relaxed atomics; a snapshot is not a consistent cut.

use std::sync::atomic::{AtomicU64, Ordering};

use sheaf_core::BackendError;

use crate::batch::FlushReason;
use crate::fanout::FanOutReport;

/// Live counters for one coordinator.
#[derive(Debug, Default)]
pub struct CoordinatorStats {
    submitted: AtomicU64,
    submission_cancelled: AtomicU64,
    caller_cancelled: AtomicU64,
    batches_by_size: AtomicU64,
    batches_by_timeout: AtomicU64,
    batches_by_shutdown: AtomicU64,
    batches_succeeded: AtomicU64,
    batches_failed: AtomicU64,
    backend_timeouts: AtomicU64,
    delivered: AtomicU64,
    abandoned: AtomicU64,
    in_flight_batches: AtomicU64,
    max_in_flight_batches: AtomicU64,
    max_batch_len: AtomicU64,
}

/// Point-in-time copy of `CoordinatorStats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Requests accepted by the intake queue.
    pub submitted: u64,
    /// Calls whose context ended before their request was accepted.
    pub submission_cancelled: u64,
    /// Calls whose context ended while waiting for an outcome.
    pub caller_cancelled: u64,
    /// Batches closed because they were full.
    pub batches_by_size: u64,
    /// Batches closed by the batch timer.
    pub batches_by_timeout: u64,
    /// Batches flushed while shutting down.
    pub batches_by_shutdown: u64,
    /// Backend calls that succeeded.
    pub batches_succeeded: u64,
    /// Backend calls that failed, timed out or panicked.
    pub batches_failed: u64,
    /// Backend calls cut off by the executor timeout.
    pub backend_timeouts: u64,
    /// Outcomes written to a slot whose caller was still attached.
    pub delivered: u64,
    /// Outcomes written to a slot whose caller had gone.
    pub abandoned: u64,
    /// Backend calls currently running.
    pub in_flight_batches: u64,
    /// Highest number of concurrent backend calls observed.
    pub max_in_flight_batches: u64,
    /// Largest batch closed so far.
    pub max_batch_len: u64,
}

impl StatsSnapshot {
    /// Total batches closed for any reason.
    #[must_use]
    pub const fn total_batches(&self) -> u64 {
        self.batches_by_size + self.batches_by_timeout + self.batches_by_shutdown
    }

    /// Total outcomes written, whether or not the caller was still there.
    #[must_use]
    pub const fn total_fanned_out(&self) -> u64 {
        self.delivered + self.abandoned
    }
}

impl CoordinatorStats {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a request accepted by the intake queue.
    pub fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a call cancelled before submission.
    pub fn record_submission_cancelled(&self) {
        self.submission_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a caller that stopped waiting.
    pub fn record_caller_cancelled(&self) {
        self.caller_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a closed batch.
    pub fn record_flush(&self, reason: FlushReason, batch_len: usize) {
        let counter = match reason {
            FlushReason::Size => &self.batches_by_size,
            FlushReason::Timeout => &self.batches_by_timeout,
            FlushReason::Shutdown => &self.batches_by_shutdown,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.max_batch_len
            .fetch_max(batch_len as u64, Ordering::Relaxed);
    }

    /// Records the start of a backend call.
    pub fn record_batch_started(&self) {
        let now = self.in_flight_batches.fetch_add(1, Ordering::Relaxed) + 1;
        self.max_in_flight_batches.fetch_max(now, Ordering::Relaxed);
    }

    /// Records the end of a backend call.
    pub fn record_batch_finished<V>(&self, outcome: &Result<V, BackendError>) {
        self.in_flight_batches.fetch_sub(1, Ordering::Relaxed);
        match outcome {
            Ok(_) => {
                self.batches_succeeded.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                self.batches_failed.fetch_add(1, Ordering::Relaxed);
                if err.is_timeout() {
                    self.backend_timeouts.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    /// Records the result of fanning out one batch outcome.
    pub fn record_fan_out(&self, report: FanOutReport) {
        self.delivered
            .fetch_add(u64::from(report.delivered), Ordering::Relaxed);
        self.abandoned
            .fetch_add(u64::from(report.abandoned), Ordering::Relaxed);
    }

    /// Returns a copy of all counters.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            submission_cancelled: self.submission_cancelled.load(Ordering::Relaxed),
            caller_cancelled: self.caller_cancelled.load(Ordering::Relaxed),
            batches_by_size: self.batches_by_size.load(Ordering::Relaxed),
            batches_by_timeout: self.batches_by_timeout.load(Ordering::Relaxed),
            batches_by_shutdown: self.batches_by_shutdown.load(Ordering::Relaxed),
            batches_succeeded: self.batches_succeeded.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            backend_timeouts: self.backend_timeouts.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            in_flight_batches: self.in_flight_batches.load(Ordering::Relaxed),
            max_in_flight_batches: self.max_in_flight_batches.load(Ordering::Relaxed),
            max_batch_len: self.max_batch_len.load(Ordering::Relaxed),
        }
    }
}
