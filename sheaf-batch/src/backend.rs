//! The backend collaborator executed once per batch.

use std::sync::Arc;

use async_trait::async_trait;
use sheaf_core::{BackendError, BatchId};
use tokio::time::Instant;

/// Per-call context handed to the backend.
///
/// The deadline comes from `backend_call_timeout` and is independent of every
/// caller's own context. The executor drops the call once it passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchContext {
    /// The batch being executed.
    pub batch_id: BatchId,
    /// When the executor gives up on this call.
    pub deadline: Instant,
}

impl BatchContext {
    /// Returns the time left before the deadline.
    #[must_use]
    pub fn remaining(&self) -> std::time::Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// A slow shared backend that accepts many keys in one call.
///
/// The call is all-or-nothing: one `Output` or one error for the whole batch.
/// It is never retried by the pipeline.
#[async_trait]
pub trait Backend<K>: Send + Sync + 'static
where
    K: Send + Sync + 'static,
{
    /// Value returned to every caller of a successful batch.
    type Output: Clone + Send + 'static;

    /// Executes one batch. `keys` are in arrival order and may repeat.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch as a whole failed.
    async fn execute(&self, ctx: &BatchContext, keys: &[K]) -> Result<Self::Output, BackendError>;
}

#[async_trait]
impl<K, B> Backend<K> for Arc<B>
where
    K: Send + Sync + 'static,
    B: Backend<K>,
{
    type Output = B::Output;

    async fn execute(&self, ctx: &BatchContext, keys: &[K]) -> Result<Self::Output, BackendError> {
        self.as_ref().execute(ctx, keys).await
    }
}
