//! The public entry point.
//!
//! A `Coordinator` owns one pipeline (intake queue, batcher task, executor
//! task). Callers use `call` (directly or through a cloned `CallHandle`),
//! which looks synchronous: it returns once the caller's own batch has an
//! outcome, or as soon as the caller's context ends.

use std::sync::Arc;
use std::time::Duration;

use sheaf_core::{BatchConfig, Error, RequestIdAllocator, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::batcher::batcher_task;
use crate::context::CallContext;
use crate::executor::executor_task;
use crate::intake::{IntakeQueue, IntakeSender};
use crate::request::Request;
use crate::stats::{CoordinatorStats, StatsSnapshot};

/// Handle for submitting calls to a running coordinator.
///
/// Cheap to clone; every clone feeds the same pipeline.
pub struct CallHandle<K, V> {
    intake: IntakeSender<K, V>,
    stats: Arc<CoordinatorStats>,
    request_ids: Arc<RequestIdAllocator>,
}

impl<K, V> Clone for CallHandle<K, V> {
    fn clone(&self) -> Self {
        Self {
            intake: self.intake.clone(),
            stats: Arc::clone(&self.stats),
            request_ids: Arc::clone(&self.request_ids),
        }
    }
}

impl<K, V> CallHandle<K, V>
where
    K: Send + 'static,
    V: Send + 'static,
{
    /// Submits `key` and waits for its batch outcome.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `ctx` ends before the request is accepted (`SubmissionCancelled`)
    /// - `ctx` ends while waiting (`CallerCancelled`); the request still runs
    /// - the batch failed (`Backend`, identical for every member)
    /// - the coordinator has shut down (`Shutdown`)
    pub async fn call(&self, ctx: &CallContext, key: K) -> Result<V> {
        if let Some(reason) = ctx.err() {
            self.stats.record_submission_cancelled();
            return Err(Error::SubmissionCancelled { reason });
        }

        let id = self.request_ids.allocate();
        let (request, reply) = Request::new(id, key);

        // Dropping an unfinished submit leaves nothing half-enqueued.
        tokio::select! {
            biased;
            reason = ctx.done() => {
                self.stats.record_submission_cancelled();
                debug!(
                    request_id = id.get(),
                    reason = reason.as_str(),
                    "Call cancelled before submission"
                );
                return Err(Error::SubmissionCancelled { reason });
            }
            submitted = self.intake.submit(request) => submitted?,
        }
        self.stats.record_submitted();

        tokio::select! {
            biased;
            outcome = reply => {
                // A dropped slot means the pipeline was torn down mid-flight.
                outcome.unwrap_or(Err(Error::Shutdown))
            }
            reason = ctx.done() => {
                self.stats.record_caller_cancelled();
                debug!(request_id = id.get(), reason = reason.as_str(), "Caller stopped waiting");
                Err(Error::CallerCancelled { reason })
            }
        }
    }

    /// Submits `key` with a deadline `timeout` from now.
    ///
    /// # Errors
    ///
    /// Same as [`CallHandle::call`].
    pub async fn call_timeout(&self, key: K, timeout: Duration) -> Result<V> {
        self.call(&CallContext::timeout(timeout), key).await
    }

    /// Returns current counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Returns true once the coordinator no longer accepts calls.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.intake.is_closed()
    }
}

/// A running batching pipeline.
///
/// Must be started inside a tokio runtime. Dropping the coordinator without
/// `shutdown` lets the pipeline finish on its own once every handle is gone.
pub struct Coordinator<K, V> {
    handle: CallHandle<K, V>,
    batcher: JoinHandle<()>,
    executor: JoinHandle<()>,
}

impl<K, V> Coordinator<K, V>
where
    K: Send + Sync + 'static,
    V: Clone + Send + 'static,
{
    /// Validates `config` and starts a pipeline with its own intake queue.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if the configuration is rejected.
    pub fn start<B>(config: BatchConfig, backend: B) -> Result<Self>
    where
        B: Backend<K, Output = V>,
    {
        config.validate()?;
        let intake = IntakeQueue::from_config(&config);
        Self::start_with_intake(config, backend, intake)
    }

    /// Starts a pipeline consuming an explicitly supplied intake queue.
    ///
    /// Senders obtained from `intake` before this call feed the same pipeline.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if the configuration is rejected.
    pub fn start_with_intake<B>(
        config: BatchConfig,
        backend: B,
        intake: IntakeQueue<K, V>,
    ) -> Result<Self>
    where
        B: Backend<K, Output = V>,
    {
        config.validate()?;

        let (intake_tx, intake_rx) = intake.split();
        let (ready_tx, ready_rx) = mpsc::channel(config.ready_batch_capacity as usize);
        let stats = Arc::new(CoordinatorStats::new());

        #[allow(clippy::cast_possible_truncation)]
        {
            info!(
                batch_size = config.batch_size,
                batch_timeout_ms = config.batch_timeout.as_millis() as u64,
                executor_concurrency = config.executor_concurrency,
                backend_call_timeout_ms = config.backend_call_timeout.as_millis() as u64,
                intake_capacity = ?config.intake_capacity,
                "Starting coordinator"
            );
        }

        let batcher = tokio::spawn(batcher_task(
            intake_rx,
            ready_tx,
            config.clone(),
            Arc::clone(&stats),
        ));
        let executor = tokio::spawn(executor_task(
            ready_rx,
            Arc::new(backend),
            config,
            Arc::clone(&stats),
        ));

        Ok(Self {
            handle: CallHandle {
                intake: intake_tx,
                stats,
                request_ids: Arc::new(RequestIdAllocator::new()),
            },
            batcher,
            executor,
        })
    }

    /// Returns a handle that callers on other tasks can share.
    #[must_use]
    pub fn handle(&self) -> CallHandle<K, V> {
        self.handle.clone()
    }

    /// Submits `key` and waits for its batch outcome.
    ///
    /// # Errors
    ///
    /// Same as [`CallHandle::call`].
    pub async fn call(&self, ctx: &CallContext, key: K) -> Result<V> {
        self.handle.call(ctx, key).await
    }

    /// Returns current counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.handle.stats()
    }

    /// Stops intake and waits for every accepted request to be answered.
    ///
    /// Calls made after this begins fail with `Error::Shutdown`. Requests
    /// already queued are batched (flush reason `shutdown`), executed and
    /// fanned out before this returns.
    pub async fn shutdown(self) -> StatsSnapshot {
        info!("Coordinator shutting down");
        self.handle.intake.shutdown().await;

        if let Err(e) = self.batcher.await {
            warn!(error = %e, "Batcher task ended abnormally");
        }
        if let Err(e) = self.executor.await {
            warn!(error = %e, "Executor task ended abnormally");
        }

        let snapshot = self.handle.stats();
        info!(
            submitted = snapshot.submitted,
            batches = snapshot.total_batches(),
            delivered = snapshot.delivered,
            abandoned = snapshot.abandoned,
            "Coordinator stopped"
        );
        snapshot
    }
}
