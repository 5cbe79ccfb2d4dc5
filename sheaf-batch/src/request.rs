//! A single caller's request and its one-shot reply slot.

use sheaf_core::{RequestId, Result};
use tokio::sync::oneshot;

/// Receiving side of a reply slot, held by the caller.
pub type ReplyReceiver<V> = oneshot::Receiver<Result<V>>;

/// Write-once reply slot for one request.
///
/// Backed by a capacity-one oneshot channel: `deliver` never blocks and is a
/// no-op for the pipeline when the caller has stopped waiting.
#[derive(Debug)]
pub struct ReplySlot<V> {
    tx: oneshot::Sender<Result<V>>,
}

/// What happened to a delivered outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The caller was still waiting (or will read the buffered value).
    Delivered,
    /// The caller dropped its receiver; the outcome was discarded.
    Abandoned,
}

impl<V> ReplySlot<V> {
    /// Writes the outcome. Consumes the slot, so a second write cannot happen.
    pub fn deliver(self, outcome: Result<V>) -> Delivery {
        match self.tx.send(outcome) {
            Ok(()) => Delivery::Delivered,
            Err(_) => Delivery::Abandoned,
        }
    }

    /// Returns true if the caller has dropped its receiver.
    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A pending request waiting to be batched.
#[derive(Debug)]
pub struct Request<K, V> {
    id: RequestId,
    key: K,
    reply: ReplySlot<V>,
}

impl<K, V> Request<K, V> {
    /// Creates a request and the receiver its caller waits on.
    #[must_use]
    pub fn new(id: RequestId, key: K) -> (Self, ReplyReceiver<V>) {
        let (tx, rx) = oneshot::channel();
        let request = Self {
            id,
            key,
            reply: ReplySlot { tx },
        };
        (request, rx)
    }

    /// Returns the request id.
    #[must_use]
    pub const fn id(&self) -> RequestId {
        self.id
    }

    /// Returns the caller's key.
    #[must_use]
    pub const fn key(&self) -> &K {
        &self.key
    }

    /// Splits the request into its key and reply slot.
    #[must_use]
    pub fn into_parts(self) -> (K, ReplySlot<V>) {
        (self.key, self.reply)
    }
}
