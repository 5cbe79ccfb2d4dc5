//! Request batching pipeline for Sheaf.
//!
//! Many independent callers each want one logical operation performed against
//! a slow shared backend. This crate collects their requests, groups them into
//! bounded batches, executes each batch as a single backend call, and fans the
//! single outcome back out to every caller.
//!
//! # Architecture
//!
//! ```text
//! ┌────────┐   ┌──────────────┐   ┌──────────────┐   ┌────────────────┐   ┌─────────┐
//! │ callers│──▶│ IntakeQueue  │──▶│ batcher_task │──▶│ executor_task  │──▶│ fan_out │
//! │ (call) │   │ (mpsc, MPSC) │   │ size | timer │   │ semaphore(N)   │   │ 1 -> n  │
//! └────────┘   └──────────────┘   └──────────────┘   └────────────────┘   └─────────┘
//!      ▲                                                                       │
//!      └──────────────────────── oneshot reply slot ◀──────────────────────────┘
//! ```
//!
//! # Guarantees
//!
//! - Every accepted request joins exactly one batch; batches never exceed
//!   `batch_size`.
//! - Every member of a batch receives the same outcome, exactly once.
//! - A caller's context only cancels that caller's wait. An accepted request
//!   still runs; its outcome is written to the abandoned slot and discarded.
//! - At most `executor_concurrency` backend calls run at once.
//!
//! # Example
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use sheaf_batch::{Backend, BatchContext, CallContext, Coordinator};
//! use sheaf_core::{BackendError, BatchConfig};
//!
//! struct Users;
//!
//! #[async_trait]
//! impl Backend<u64> for Users {
//!     type Output = ();
//!
//!     async fn execute(&self, _ctx: &BatchContext, ids: &[u64]) -> Result<(), BackendError> {
//!         // UPDATE users SET last_active_at = NOW() WHERE id IN (ids)
//!         let _ = ids;
//!         Ok(())
//!     }
//! }
//!
//! # async fn run() -> sheaf_core::Result<()> {
//! let coordinator = Coordinator::start(BatchConfig::default(), Users)?;
//! coordinator.call(&CallContext::background(), 42).await?;
//! coordinator.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod backend;
mod batch;
mod batcher;
mod context;
mod coordinator;
mod executor;
mod fanout;
mod intake;
mod request;
mod stats;

pub use backend::{Backend, BatchContext};
pub use batch::{Batch, FlushReason};
pub use batcher::batcher_task;
pub use context::CallContext;
pub use coordinator::{CallHandle, Coordinator};
pub use executor::executor_task;
pub use fanout::{fan_out, FanOutReport};
pub use intake::{IntakeMessage, IntakeQueue, IntakeReceiver, IntakeSender};
pub use request::{Delivery, ReplyReceiver, ReplySlot, Request};
pub use stats::{CoordinatorStats, StatsSnapshot};

// Cancellation tokens are part of the `CallContext` API.
pub use tokio_util::sync::CancellationToken;
