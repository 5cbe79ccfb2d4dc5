//! Intake queue between callers and the batcher.
//!
//! Many producers, one consumer. The queue is an explicit value handed to the
//! coordinator, so independent coordinators never share state.

use sheaf_core::{BatchConfig, Error, Result};
use tokio::sync::mpsc;

use crate::request::Request;

/// Message sent to the batcher task.
#[derive(Debug)]
pub enum IntakeMessage<K, V> {
    /// Submit a new request to be batched.
    Submit(Request<K, V>),
    /// Stop accepting requests, drain what is queued, then exit.
    Shutdown,
}

#[derive(Debug)]
enum SenderKind<K, V> {
    Bounded(mpsc::Sender<IntakeMessage<K, V>>),
    Unbounded(mpsc::UnboundedSender<IntakeMessage<K, V>>),
}

#[derive(Debug)]
enum ReceiverKind<K, V> {
    Bounded(mpsc::Receiver<IntakeMessage<K, V>>),
    Unbounded(mpsc::UnboundedReceiver<IntakeMessage<K, V>>),
}

/// Producer side of the intake queue. Cheap to clone.
#[derive(Debug)]
pub struct IntakeSender<K, V> {
    inner: SenderKind<K, V>,
}

impl<K, V> Clone for IntakeSender<K, V> {
    fn clone(&self) -> Self {
        let inner = match &self.inner {
            SenderKind::Bounded(tx) => SenderKind::Bounded(tx.clone()),
            SenderKind::Unbounded(tx) => SenderKind::Unbounded(tx.clone()),
        };
        Self { inner }
    }
}

impl<K, V> IntakeSender<K, V> {
    /// Hands a request to the batcher.
    ///
    /// Waits for room when the queue is bounded and full. Dropping the
    /// returned future before it completes leaves the request unsent.
    ///
    /// # Errors
    /// Returns `Error::Shutdown` if the batcher no longer accepts requests.
    pub async fn submit(&self, request: Request<K, V>) -> Result<()> {
        let message = IntakeMessage::Submit(request);
        let sent = match &self.inner {
            SenderKind::Bounded(tx) => tx.send(message).await.is_ok(),
            SenderKind::Unbounded(tx) => tx.send(message).is_ok(),
        };
        if sent {
            Ok(())
        } else {
            Err(Error::Shutdown)
        }
    }

    /// Asks the batcher to drain and exit. A no-op if it already has.
    pub async fn shutdown(&self) {
        let _ = match &self.inner {
            SenderKind::Bounded(tx) => tx.send(IntakeMessage::Shutdown).await.is_ok(),
            SenderKind::Unbounded(tx) => tx.send(IntakeMessage::Shutdown).is_ok(),
        };
    }

    /// Returns true once the batcher has stopped accepting requests.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        match &self.inner {
            SenderKind::Bounded(tx) => tx.is_closed(),
            SenderKind::Unbounded(tx) => tx.is_closed(),
        }
    }
}

/// Consumer side of the intake queue, owned by the batcher task.
#[derive(Debug)]
pub struct IntakeReceiver<K, V> {
    inner: ReceiverKind<K, V>,
}

impl<K, V> IntakeReceiver<K, V> {
    /// Receives the next message, or `None` once closed and drained.
    pub async fn recv(&mut self) -> Option<IntakeMessage<K, V>> {
        match &mut self.inner {
            ReceiverKind::Bounded(rx) => rx.recv().await,
            ReceiverKind::Unbounded(rx) => rx.recv().await,
        }
    }

    /// Rejects further submissions. Already queued messages stay receivable.
    pub fn close(&mut self) {
        match &mut self.inner {
            ReceiverKind::Bounded(rx) => rx.close(),
            ReceiverKind::Unbounded(rx) => rx.close(),
        }
    }
}

/// An intake queue, not yet split between producers and the batcher.
#[derive(Debug)]
pub struct IntakeQueue<K, V> {
    sender: IntakeSender<K, V>,
    receiver: IntakeReceiver<K, V>,
}

impl<K, V> IntakeQueue<K, V> {
    /// Creates an unbounded queue. Submission never waits.
    #[must_use]
    pub fn unbounded() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            sender: IntakeSender {
                inner: SenderKind::Unbounded(tx),
            },
            receiver: IntakeReceiver {
                inner: ReceiverKind::Unbounded(rx),
            },
        }
    }

    /// Creates a bounded queue. Submission waits while it is full.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn bounded(capacity: u32) -> Self {
        assert!(capacity > 0, "intake capacity must be positive");
        let (tx, rx) = mpsc::channel(capacity as usize);
        Self {
            sender: IntakeSender {
                inner: SenderKind::Bounded(tx),
            },
            receiver: IntakeReceiver {
                inner: ReceiverKind::Bounded(rx),
            },
        }
    }

    /// Creates the queue described by `config.intake_capacity`.
    ///
    /// # Panics
    /// Panics if the capacity is `Some(0)`; call `BatchConfig::validate` first.
    #[must_use]
    pub fn from_config(config: &BatchConfig) -> Self {
        config
            .intake_capacity
            .map_or_else(Self::unbounded, Self::bounded)
    }

    /// Returns another producer handle for this queue.
    #[must_use]
    pub fn sender(&self) -> IntakeSender<K, V> {
        self.sender.clone()
    }

    /// Splits the queue into its producer and consumer sides.
    #[must_use]
    pub fn split(self) -> (IntakeSender<K, V>, IntakeReceiver<K, V>) {
        (self.sender, self.receiver)
    }
}
