//! Batch executor pool.
//!
//! Runs closed batches against the backend with at most
//! `executor_concurrency` calls in flight. Every batch gets a fresh
//! `backend_call_timeout`; whatever the call produces (value, error, timeout
//! or panic) becomes the single outcome fanned out to its members.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use sheaf_core::{BackendError, BatchConfig, Error};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backend::{Backend, BatchContext};
use crate::batch::Batch;
use crate::context::deadline_after;
use crate::fanout::fan_out;
use crate::stats::CoordinatorStats;

/// Background task that executes closed batches.
///
/// Waits for an executor slot before taking the next batch off `ready_rx`, so
/// excess batches queue in the channel. Returns once `ready_rx` is closed and
/// every running batch has been fanned out.
pub async fn executor_task<K, B>(
    mut ready_rx: mpsc::Receiver<Batch<K, B::Output>>,
    backend: Arc<B>,
    config: BatchConfig,
    stats: Arc<CoordinatorStats>,
) where
    K: Send + Sync + 'static,
    B: Backend<K>,
{
    let semaphore = Arc::new(Semaphore::new(config.executor_concurrency as usize));
    let call_timeout = config.backend_call_timeout;
    let mut running = JoinSet::new();

    #[allow(clippy::cast_possible_truncation)]
    {
        info!(
            executor_concurrency = config.executor_concurrency,
            backend_call_timeout_ms = call_timeout.as_millis() as u64,
            "Executor task started"
        );
    }

    loop {
        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
            // The semaphore is never closed while this task owns it.
            break;
        };
        let Some(batch) = ready_rx.recv().await else {
            break;
        };

        // Reap finished batches so the set does not grow unbounded.
        while let Some(joined) = running.try_join_next() {
            log_join_error(joined);
        }

        running.spawn(run_batch(
            batch,
            Arc::clone(&backend),
            call_timeout,
            Arc::clone(&stats),
            permit,
        ));
    }

    while let Some(joined) = running.join_next().await {
        log_join_error(joined);
    }
    info!("Executor task shutting down");
}

fn log_join_error(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        warn!(error = %e, "Batch task ended abnormally");
    }
}

/// Executes one batch and fans its outcome out to every member.
#[tracing::instrument(
    skip_all,
    name = "execute_batch",
    fields(batch_id = batch.id().get(), batch_size = batch.len())
)]
async fn run_batch<K, B>(
    batch: Batch<K, B::Output>,
    backend: Arc<B>,
    call_timeout: Duration,
    stats: Arc<CoordinatorStats>,
    permit: OwnedSemaphorePermit,
) where
    K: Send + Sync + 'static,
    B: Backend<K>,
{
    let batch_id = batch.id();
    let (keys, slots) = batch.into_parts();

    stats.record_batch_started();
    let outcome = call_backend(backend.as_ref(), batch_id, &keys, call_timeout).await;
    stats.record_batch_finished(&outcome);
    // The slot frees up before fan-out; delivery never waits on other batches.
    drop(permit);

    if let Err(err) = &outcome {
        warn!(batch_id = batch_id.get(), error = %err, "Backend call failed");
    }

    let report = fan_out(slots, outcome.map_err(Error::Backend));
    stats.record_fan_out(report);
    debug!(
        batch_id = batch_id.get(),
        delivered = report.delivered,
        abandoned = report.abandoned,
        "Batch outcome fanned out"
    );
}

/// Calls the backend once, bounded by `call_timeout`.
///
/// A panic inside the backend is caught and reported as an error, so the
/// batch still produces exactly one outcome.
async fn call_backend<K, B>(
    backend: &B,
    batch_id: sheaf_core::BatchId,
    keys: &[K],
    call_timeout: Duration,
) -> Result<B::Output, BackendError>
where
    K: Send + Sync + 'static,
    B: Backend<K>,
{
    let started = Instant::now();
    let ctx = BatchContext {
        batch_id,
        deadline: deadline_after(started, call_timeout),
    };
    let call = AssertUnwindSafe(backend.execute(&ctx, keys)).catch_unwind();

    match tokio::time::timeout(call_timeout, call).await {
        Ok(Ok(result)) => result,
        Ok(Err(panic)) => Err(BackendError::Panicked {
            message: panic_message(panic.as_ref()),
        }),
        #[allow(clippy::cast_possible_truncation)]
        Err(_elapsed) => Err(BackendError::TimedOut {
            waited_us: started.elapsed().as_micros() as u64,
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::FlushReason;
    use crate::request::{ReplyReceiver, Request};
    use async_trait::async_trait;
    use sheaf_core::{BatchId, RequestId};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    /// Sleeps, then echoes the batch length. Tracks concurrent calls.
    struct SlowBackend {
        latency: Duration,
        fail: bool,
        in_flight: AtomicU64,
        max_in_flight: AtomicU64,
        calls: Mutex<Vec<Vec<u64>>>,
    }

    impl SlowBackend {
        fn new(latency: Duration) -> Self {
            Self {
                latency,
                fail: false,
                in_flight: AtomicU64::new(0),
                max_in_flight: AtomicU64::new(0),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Backend<u64> for SlowBackend {
        type Output = usize;

        async fn execute(&self, _ctx: &BatchContext, keys: &[u64]) -> Result<usize, BackendError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.calls.lock().unwrap().push(keys.to_vec());
            tokio::time::sleep(self.latency).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.fail {
                Err(BackendError::failed("deadlock detected"))
            } else {
                Ok(keys.len())
            }
        }
    }

    struct PanickingBackend;

    #[async_trait]
    impl Backend<u64> for PanickingBackend {
        type Output = ();

        async fn execute(&self, _ctx: &BatchContext, _keys: &[u64]) -> Result<(), BackendError> {
            panic!("backend exploded");
        }
    }

    fn make_batch<V>(id: u64, keys: &[u64]) -> (Batch<u64, V>, Vec<ReplyReceiver<V>>) {
        let mut requests = Vec::new();
        let mut replies = Vec::new();
        for (i, key) in keys.iter().enumerate() {
            let (request, reply) = Request::new(RequestId::new(id * 100 + i as u64), *key);
            requests.push(request);
            replies.push(reply);
        }
        let batch = Batch::new(BatchId::new(id), requests, Instant::now(), FlushReason::Size);
        (batch, replies)
    }

    fn spawn_executor<B: Backend<u64>>(
        backend: Arc<B>,
        config: BatchConfig,
    ) -> (
        mpsc::Sender<Batch<u64, B::Output>>,
        Arc<CoordinatorStats>,
        tokio::task::JoinHandle<()>,
    ) {
        let (tx, rx) = mpsc::channel(64);
        let stats = Arc::new(CoordinatorStats::new());
        let task = tokio::spawn(executor_task(rx, backend, config, Arc::clone(&stats)));
        (tx, stats, task)
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_delivered_to_every_member() {
        let backend = Arc::new(SlowBackend::new(Duration::from_millis(5)));
        let (tx, stats, task) = spawn_executor(Arc::clone(&backend), BatchConfig::for_testing());

        let (batch, replies) = make_batch(1, &[10, 11, 10]);
        tx.send(batch).await.unwrap();
        for reply in replies {
            assert_eq!(reply.await.unwrap(), Ok(3));
        }

        drop(tx);
        task.await.unwrap();
        assert_eq!(*backend.calls.lock().unwrap(), vec![vec![10, 11, 10]]);
        let snap = stats.snapshot();
        assert_eq!(snap.batches_succeeded, 1);
        assert_eq!(snap.delivered, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_delivered_to_every_member() {
        let mut backend = SlowBackend::new(Duration::from_millis(1));
        backend.fail = true;
        let (tx, stats, task) = spawn_executor(Arc::new(backend), BatchConfig::for_testing());

        let (batch, replies) = make_batch(1, &[1, 2]);
        tx.send(batch).await.unwrap();
        let expected = Err(Error::Backend(BackendError::failed("deadlock detected")));
        for reply in replies {
            assert_eq!(reply.await.unwrap(), expected);
        }

        drop(tx);
        task.await.unwrap();
        assert_eq!(stats.snapshot().batches_failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backend_timeout_is_batch_outcome() {
        let backend = Arc::new(SlowBackend::new(Duration::from_secs(30)));
        let config =
            BatchConfig::for_testing().with_backend_call_timeout(Duration::from_millis(100));
        let (tx, stats, task) = spawn_executor(backend, config);

        let (batch, replies) = make_batch(1, &[1, 2, 3]);
        tx.send(batch).await.unwrap();
        for reply in replies {
            let outcome = reply.await.unwrap();
            assert!(
                matches!(outcome, Err(Error::Backend(BackendError::TimedOut { .. }))),
                "unexpected outcome: {outcome:?}"
            );
        }

        drop(tx);
        task.await.unwrap();
        let snap = stats.snapshot();
        assert_eq!(snap.backend_timeouts, 1);
        assert_eq!(snap.in_flight_batches, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrepresentable_call_timeout_still_runs() {
        let backend = Arc::new(SlowBackend::new(Duration::from_millis(5)));
        let config = BatchConfig::for_testing().with_backend_call_timeout(Duration::MAX);
        let (tx, stats, task) = spawn_executor(backend, config);

        let (batch, replies) = make_batch(1, &[4, 5]);
        tx.send(batch).await.unwrap();
        for reply in replies {
            assert_eq!(reply.await.unwrap(), Ok(2));
        }

        drop(tx);
        task.await.unwrap();
        let snap = stats.snapshot();
        assert_eq!(snap.batches_succeeded, 1);
        assert_eq!(snap.in_flight_batches, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_limit_respected() {
        let backend = Arc::new(SlowBackend::new(Duration::from_millis(20)));
        let config = BatchConfig::for_testing().with_executor_concurrency(2);
        let (tx, stats, task) = spawn_executor(Arc::clone(&backend), config);

        let mut all_replies = Vec::new();
        for id in 0..10 {
            let (batch, replies) = make_batch(id, &[id, id + 1]);
            tx.send(batch).await.unwrap();
            all_replies.extend(replies);
        }
        for reply in all_replies {
            assert_eq!(reply.await.unwrap(), Ok(2));
        }

        drop(tx);
        task.await.unwrap();
        assert_eq!(backend.max_in_flight.load(Ordering::SeqCst), 2);
        assert_eq!(stats.snapshot().max_in_flight_batches, 2);
        assert_eq!(backend.calls.lock().unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_panicking_backend_still_answers() {
        let (tx, stats, task) =
            spawn_executor(Arc::new(PanickingBackend), BatchConfig::for_testing());

        let (batch, replies) = make_batch(1, &[1, 2]);
        tx.send(batch).await.unwrap();
        for reply in replies {
            assert_eq!(
                reply.await.unwrap(),
                Err(Error::Backend(BackendError::Panicked {
                    message: "backend exploded".to_string(),
                }))
            );
        }

        drop(tx);
        task.await.unwrap();
        assert_eq!(stats.snapshot().batches_failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drains_running_batches_on_close() {
        let backend = Arc::new(SlowBackend::new(Duration::from_millis(50)));
        let (tx, stats, task) = spawn_executor(backend, BatchConfig::for_testing());

        let (batch, replies) = make_batch(1, &[7]);
        tx.send(batch).await.unwrap();
        drop(tx);

        // The task waits for the running batch before exiting.
        task.await.unwrap();
        assert_eq!(stats.snapshot().delivered, 1);
        for reply in replies {
            assert_eq!(reply.await.unwrap(), Ok(1));
        }
    }
}
