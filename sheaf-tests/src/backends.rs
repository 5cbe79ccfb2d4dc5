//! Instrumented backends for integration tests.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use sheaf_batch::{Backend, BatchContext};
use sheaf_core::{BackendError, BatchId};
use tokio::time::Instant;

/// What every member of a successful batch receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchReceipt {
    /// Batch that carried the call.
    pub batch_id: BatchId,
    /// Number of keys in that batch.
    pub len: usize,
}

/// One backend call as seen by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedBatch {
    /// Batch identifier from the executor.
    pub batch_id: BatchId,
    /// Keys in arrival order.
    pub keys: Vec<u64>,
    /// When the backend call began.
    pub started_at: Instant,
    /// Time left on the call's deadline when it began.
    pub deadline_remaining: Duration,
}

/// Backend that records every call and tracks how many run at once.
///
/// Each call sleeps for `latency`, then succeeds with a [`BatchReceipt`] or
/// fails, depending on the failure switch.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    latency: Duration,
    failing: AtomicBool,
    batches: Mutex<Vec<RecordedBatch>>,
    in_flight: AtomicU32,
    max_in_flight: AtomicU32,
}

/// Error message returned while the failure switch is on.
pub const INJECTED_FAILURE: &str = "injected backend failure";

impl RecordingBackend {
    /// Creates a backend whose calls take `latency`.
    #[must_use]
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    /// Turns the failure switch on or off.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Returns every recorded call in start order.
    #[must_use]
    pub fn batches(&self) -> Vec<RecordedBatch> {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the size of every recorded call in start order.
    #[must_use]
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches().iter().map(|b| b.keys.len()).collect()
    }

    /// Returns the number of backend calls made.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns the number of calls running right now.
    #[must_use]
    pub fn in_flight(&self) -> u32 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Returns the highest number of calls observed running at once.
    #[must_use]
    pub fn max_in_flight(&self) -> u32 {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

/// Keeps `in_flight` accurate when the executor drops a timed-out call.
struct InFlight<'a>(&'a AtomicU32);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Backend<u64> for RecordingBackend {
    type Output = BatchReceipt;

    async fn execute(
        &self,
        ctx: &BatchContext,
        keys: &[u64],
    ) -> Result<BatchReceipt, BackendError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedBatch {
                batch_id: ctx.batch_id,
                keys: keys.to_vec(),
                started_at: Instant::now(),
                deadline_remaining: ctx.remaining(),
            });
        tracing::trace!(
            batch_id = ctx.batch_id.get(),
            len = keys.len(),
            in_flight = now,
            "recorded batch"
        );

        tokio::time::sleep(self.latency).await;

        if self.failing.load(Ordering::SeqCst) {
            return Err(BackendError::failed(INJECTED_FAILURE));
        }
        Ok(BatchReceipt {
            batch_id: ctx.batch_id,
            len: keys.len(),
        })
    }
}
