//! Simulated `users` table.
//!
//! Stands in for a database that is slow per round trip but happy to update
//! many rows at once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sheaf_batch::{Backend, BatchContext};
use sheaf_core::BackendError;
use tracing::debug;

/// In-memory `users` table with simulated query latency and failures.
pub struct UserStore {
    latency: Duration,
    failure_rate: f64,
    rng: Mutex<ChaCha8Rng>,
    last_active_at: Mutex<HashMap<u64, u128>>,
    queries: AtomicU64,
}

impl UserStore {
    /// Creates a store. `failure_rate` is clamped to `[0, 1]`.
    pub fn new(latency: Duration, failure_rate: f64, seed: u64) -> Self {
        Self {
            latency,
            failure_rate: failure_rate.clamp(0.0, 1.0),
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
            last_active_at: Mutex::new(HashMap::new()),
            queries: AtomicU64::new(0),
        }
    }

    /// Number of queries executed.
    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }

    /// Number of distinct users touched.
    pub fn user_count(&self) -> usize {
        self.last_active_at.lock().map_or(0, |t| t.len())
    }

    fn should_fail(&self) -> bool {
        self.failure_rate > 0.0
            && self
                .rng
                .lock()
                .is_ok_and(|mut rng| rng.gen_bool(self.failure_rate))
    }
}

#[async_trait]
impl Backend<u64> for UserStore {
    type Output = ();

    async fn execute(&self, ctx: &BatchContext, user_ids: &[u64]) -> Result<(), BackendError> {
        let ids = user_ids
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        debug!(
            batch_id = ctx.batch_id.get(),
            "Executed: UPDATE users SET last_active_at = NOW() WHERE id IN ({ids})"
        );

        tokio::time::sleep(self.latency).await;

        self.queries.fetch_add(1, Ordering::Relaxed);
        if self.should_fail() {
            return Err(BackendError::failed("simulated query failure"));
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_micros());
        let mut table = self
            .last_active_at
            .lock()
            .map_err(|_| BackendError::failed("users table poisoned"))?;
        for id in user_ids {
            table.insert(*id, now);
        }
        Ok(())
    }
}
