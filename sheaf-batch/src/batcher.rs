//! Request batching.
//!
//! This module groups individual caller requests into bounded batches, so a
//! slow backend is called once per batch instead of once per request.
//!
//! # Design
//!
//! ```text
//! Request 1 ──┐
//! Request 2 ──┼──> batcher_task ──> Batch ──> executor_task ──> 1 backend call ──> Notify All
//! Request 3 ──┘   (batch_timeout)
//! ```
//!
//! The batcher accumulates requests until either:
//! - The batch timer expires (started when the batch's first request arrived)
//! - The batch reaches `batch_size` requests
//!
//! Both triggers are decided inside this single loop, so a batch is closed by
//! exactly one of them. The timer is not restarted by later arrivals.

use std::sync::Arc;

use sheaf_core::{BatchConfig, BatchId, Error};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::batch::{Batch, FlushReason};
use crate::context::deadline_after;
use crate::fanout::fan_out;
use crate::intake::{IntakeMessage, IntakeReceiver};
use crate::request::Request;
use crate::stats::CoordinatorStats;

/// The in-progress batch.
struct AccumulatedBatch<K, V> {
    /// Requests in arrival order.
    requests: Vec<Request<K, V>>,
    /// Time when first request was added.
    first_request_time: Instant,
}

impl<K, V> AccumulatedBatch<K, V> {
    fn new(capacity: usize) -> Self {
        Self {
            requests: Vec::with_capacity(capacity),
            first_request_time: Instant::now(),
        }
    }

    fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    fn request_count(&self) -> usize {
        self.requests.len()
    }
}

/// Background task that turns the intake stream into batches.
///
/// This task:
/// 1. Receives requests from the intake queue
/// 2. Accumulates them into the in-progress batch
/// 3. Closes the batch on size or on timeout, whichever comes first
/// 4. Hands closed batches to the executor over `ready_tx`
///
/// On `IntakeMessage::Shutdown` the intake is closed and drained; when the
/// intake ends, any partial batch is flushed before the task returns.
pub async fn batcher_task<K, V>(
    mut intake: IntakeReceiver<K, V>,
    ready_tx: mpsc::Sender<Batch<K, V>>,
    config: BatchConfig,
    stats: Arc<CoordinatorStats>,
) where
    K: Send + 'static,
    V: Clone + Send + 'static,
{
    let batch_size = config.batch_size as usize;
    let batch_timeout = config.batch_timeout;
    let mut batch = AccumulatedBatch::new(batch_size);
    let mut next_batch_id = BatchId::new(0);
    let mut draining = false;

    #[allow(clippy::cast_possible_truncation)]
    {
        info!(
            batch_size = config.batch_size,
            batch_timeout_ms = batch_timeout.as_millis() as u64,
            "Batcher task started"
        );
    }

    loop {
        // Only a non-empty batch has a running timer.
        let flush_deadline = (!batch.is_empty())
            .then(|| deadline_after(batch.first_request_time, batch_timeout));

        tokio::select! {
            msg = intake.recv() => {
                match msg {
                    Some(IntakeMessage::Submit(request)) => {
                        // The timer may have expired while this request sat in the queue.
                        if flush_deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                            let reason = FlushReason::Timeout;
                            flush(&mut batch, &mut next_batch_id, reason, &ready_tx, &stats).await;
                        }

                        if batch.is_empty() {
                            batch.first_request_time = Instant::now();
                        }
                        batch.requests.push(request);

                        if batch.request_count() >= batch_size {
                            let reason = FlushReason::Size;
                            flush(&mut batch, &mut next_batch_id, reason, &ready_tx, &stats).await;
                        }
                    }
                    Some(IntakeMessage::Shutdown) => {
                        if !draining {
                            info!(pending = batch.request_count(), "Batcher draining intake");
                            intake.close();
                            draining = true;
                        }
                    }
                    None => {
                        if !batch.is_empty() {
                            let reason = FlushReason::Shutdown;
                            flush(&mut batch, &mut next_batch_id, reason, &ready_tx, &stats).await;
                        }
                        info!(batches = next_batch_id.get(), "Batcher task shutting down");
                        break;
                    }
                }
            }
            () = async move {
                if let Some(deadline) = flush_deadline {
                    tokio::time::sleep_until(deadline).await;
                } else {
                    // No batch open, wait forever for next message.
                    std::future::pending::<()>().await;
                }
            } => {
                let reason = FlushReason::Timeout;
                flush(&mut batch, &mut next_batch_id, reason, &ready_tx, &stats).await;
            }
        }
    }
}

/// Closes the in-progress batch and hands it to the executor.
async fn flush<K, V>(
    batch: &mut AccumulatedBatch<K, V>,
    next_batch_id: &mut BatchId,
    reason: FlushReason,
    ready_tx: &mpsc::Sender<Batch<K, V>>,
    stats: &CoordinatorStats,
) where
    V: Clone,
{
    let requests = std::mem::take(&mut batch.requests);
    let closed = Batch::new(*next_batch_id, requests, batch.first_request_time, reason);
    *next_batch_id = next_batch_id.next();
    hand_off(closed, ready_tx, stats).await;
}

#[tracing::instrument(
    skip_all,
    name = "batcher_flush",
    fields(batch_id = batch.id().get(), batch_size = batch.len())
)]
async fn hand_off<K, V>(
    batch: Batch<K, V>,
    ready_tx: &mpsc::Sender<Batch<K, V>>,
    stats: &CoordinatorStats,
) where
    V: Clone,
{
    stats.record_flush(batch.reason(), batch.len());

    #[allow(clippy::cast_possible_truncation)]
    {
        debug!(
            batch_id = batch.id().get(),
            reason = batch.reason().as_str(),
            batch_size = batch.len(),
            batch_age_us = batch.age().as_micros() as u64,
            "Batch flush"
        );
    }

    if let Err(mpsc::error::SendError(batch)) = ready_tx.send(batch).await {
        // Executor is gone. Members still get exactly one outcome.
        warn!(
            batch_id = batch.id().get(),
            batch_size = batch.len(),
            "Executor stopped, failing batch"
        );
        let (_, slots) = batch.into_parts();
        let report = fan_out(slots, Err(Error::Shutdown));
        stats.record_fan_out(report);
    }
}
