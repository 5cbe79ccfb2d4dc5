//! Closed batches handed from the batcher to the executor pool.

use std::time::Duration;

use sheaf_core::BatchId;
use tokio::time::Instant;

use crate::request::{ReplySlot, Request};

/// Why the batcher closed a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlushReason {
    /// The batch reached `batch_size`.
    Size,
    /// `batch_timeout` elapsed since the first request arrived.
    Timeout,
    /// The intake closed with a partial batch pending.
    Shutdown,
}

impl FlushReason {
    /// Returns a short static name for logging.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Size => "size",
            Self::Timeout => "timeout",
            Self::Shutdown => "shutdown",
        }
    }
}

/// A non-empty, ordered group of requests that share one backend call.
#[derive(Debug)]
pub struct Batch<K, V> {
    id: BatchId,
    requests: Vec<Request<K, V>>,
    opened_at: Instant,
    reason: FlushReason,
}

impl<K, V> Batch<K, V> {
    /// Creates a closed batch.
    ///
    /// # Panics
    /// Panics if `requests` is empty.
    #[must_use]
    pub fn new(
        id: BatchId,
        requests: Vec<Request<K, V>>,
        opened_at: Instant,
        reason: FlushReason,
    ) -> Self {
        assert!(!requests.is_empty(), "batch must not be empty");
        Self {
            id,
            requests,
            opened_at,
            reason,
        }
    }

    /// Returns the batch id.
    #[must_use]
    pub const fn id(&self) -> BatchId {
        self.id
    }

    /// Returns the number of requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Returns true if the batch has no requests.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Returns why the batch was closed.
    #[must_use]
    pub const fn reason(&self) -> FlushReason {
        self.reason
    }

    /// Returns when the first request joined the batch.
    #[must_use]
    pub const fn opened_at(&self) -> Instant {
        self.opened_at
    }

    /// Returns time elapsed since the first request joined.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.opened_at.elapsed()
    }

    /// Splits the batch into keys and reply slots, both in arrival order.
    #[must_use]
    pub fn into_parts(self) -> (Vec<K>, Vec<ReplySlot<V>>) {
        self.requests.into_iter().map(Request::into_parts).unzip()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheaf_core::RequestId;

    #[test]
    fn test_into_parts_preserves_order() {
        let requests: Vec<_> = (0..3)
            .map(|i| Request::<u64, ()>::new(RequestId::new(i), i * 10).0)
            .collect();
        let batch = Batch::new(BatchId::new(1), requests, Instant::now(), FlushReason::Size);
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.reason().as_str(), "size");

        let (keys, slots) = batch.into_parts();
        assert_eq!(keys, vec![0, 10, 20]);
        assert_eq!(slots.len(), 3);
    }

    #[test]
    #[should_panic(expected = "batch must not be empty")]
    fn test_empty_batch_rejected() {
        let _ = Batch::<u64, ()>::new(
            BatchId::new(1),
            Vec::new(),
            Instant::now(),
            FlushReason::Timeout,
        );
    }
}
