//! Reusable test scenarios for the batcher.
//!
//! Scenarios describe who calls when, and with what patience, so tests can
//! be composed from the same arrival patterns.

use std::sync::Arc;
use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sheaf_batch::{CallContext, CallHandle, Coordinator};
use sheaf_core::{BatchConfig, Result};
use tokio::task::JoinSet;

use crate::backends::{BatchReceipt, RecordingBackend};

/// Standard configurations.
pub mod configs {
    use std::time::Duration;

    use sheaf_core::BatchConfig;

    /// Small batches with a long timer: 3 per batch, 50ms.
    #[must_use]
    pub const fn small_batches() -> BatchConfig {
        BatchConfig::new()
            .with_batch_size(3)
            .with_batch_timeout(Duration::from_millis(50))
    }

    /// Batches of one: every call is its own backend call.
    #[must_use]
    pub const fn pass_through() -> BatchConfig {
        BatchConfig::new()
            .with_batch_size(1)
            .with_batch_timeout(Duration::from_millis(10))
    }
}

/// Seeds for reproducible testing.
pub mod seeds {
    /// Standard test seeds that have historically found bugs.
    pub const REGRESSION_SEEDS: &[u64] = &[42, 12345, 0xDEAD_BEEF, 999, 7777, 0x1337, 1, 0];
}

/// One caller in a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arrival {
    /// Key the caller submits.
    pub key: u64,
    /// Delay from scenario start until the call is made.
    pub at: Duration,
    /// How long the caller will wait. `None` waits indefinitely.
    pub patience: Option<Duration>,
}

impl Arrival {
    /// A patient caller arriving `at` after the start.
    #[must_use]
    pub const fn new(key: u64, at: Duration) -> Self {
        Self {
            key,
            at,
            patience: None,
        }
    }

    /// Limits how long this caller waits.
    #[must_use]
    pub const fn with_patience(mut self, patience: Duration) -> Self {
        self.patience = Some(patience);
        self
    }

    fn context(&self) -> CallContext {
        self.patience
            .map_or_else(CallContext::background, CallContext::timeout)
    }
}

/// `count` patient callers with keys `0..count`, all arriving at once.
#[must_use]
pub fn burst(count: u64) -> Vec<Arrival> {
    (0..count).map(|key| Arrival::new(key, Duration::ZERO)).collect()
}

/// `count` callers with keys `0..count`, spaced by `gap`.
#[must_use]
pub fn evenly_spaced(count: u64, gap: Duration) -> Vec<Arrival> {
    (0..count)
        .map(|key| Arrival::new(key, gap * u32::try_from(key).unwrap_or(u32::MAX)))
        .collect()
}

/// `count` callers with keys `0..count` arriving at random gaps up to
/// `max_gap`. A `patient_ratio` share of callers wait indefinitely; the rest
/// give up after a random patience up to `max_patience`.
#[must_use]
pub fn staggered(
    seed: u64,
    count: u64,
    max_gap: Duration,
    patient_ratio: f64,
    max_patience: Duration,
) -> Vec<Arrival> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let max_gap_us = u64::try_from(max_gap.as_micros()).unwrap_or(u64::MAX);
    let max_patience_us = u64::try_from(max_patience.as_micros())
        .unwrap_or(u64::MAX)
        .max(1);

    let mut at = Duration::ZERO;
    (0..count)
        .map(|key| {
            at += Duration::from_micros(rng.gen_range(0..=max_gap_us));
            let arrival = Arrival::new(key, at);
            if rng.gen_bool(patient_ratio.clamp(0.0, 1.0)) {
                arrival
            } else {
                arrival.with_patience(Duration::from_micros(rng.gen_range(1..=max_patience_us)))
            }
        })
        .collect()
}

/// Makes every call in `arrivals` through `handle` and collects the outcomes.
///
/// Results are returned in completion order.
pub async fn drive(
    handle: &CallHandle<u64, BatchReceipt>,
    arrivals: &[Arrival],
) -> Vec<(u64, Result<BatchReceipt>)> {
    let mut callers = JoinSet::new();
    for arrival in arrivals.iter().copied() {
        let handle = handle.clone();
        callers.spawn(async move {
            tokio::time::sleep(arrival.at).await;
            let outcome = handle.call(&arrival.context(), arrival.key).await;
            (arrival.key, outcome)
        });
    }

    let mut outcomes = Vec::with_capacity(arrivals.len());
    while let Some(joined) = callers.join_next().await {
        match joined {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => tracing::warn!(error = %e, "caller task failed"),
        }
    }
    outcomes
}

/// A coordinator wired to a fresh [`RecordingBackend`].
pub struct Rig {
    /// The pipeline under test.
    pub coordinator: Coordinator<u64, BatchReceipt>,
    /// The backend it calls.
    pub backend: Arc<RecordingBackend>,
    /// The configuration it was started with.
    pub config: BatchConfig,
}

impl Rig {
    /// Starts a coordinator with `config` over a backend taking `latency`.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` is rejected.
    pub fn start(config: BatchConfig, latency: Duration) -> Result<Self> {
        let backend = Arc::new(RecordingBackend::new(latency));
        let coordinator = Coordinator::start(config.clone(), Arc::clone(&backend))?;
        Ok(Self {
            coordinator,
            backend,
            config,
        })
    }

    /// Runs `arrivals` against the coordinator.
    pub async fn drive(&self, arrivals: &[Arrival]) -> Vec<(u64, Result<BatchReceipt>)> {
        drive(&self.coordinator.handle(), arrivals).await
    }
}
