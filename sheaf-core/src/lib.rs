//! Sheaf Core - Strongly-typed identifiers, errors and configuration for Sheaf.
//!
//! This crate has no runtime dependency. The batching pipeline itself lives in
//! `sheaf-batch`; everything a caller needs to name an outcome lives here.
//!
//! # Design Principles (TigerStyle)
//!
//! - **Strongly-typed IDs**: Prevent mixing up a `RequestId` with a `BatchId`
//! - **Explicit limits**: Batch size and executor concurrency are bounded
//! - **Exactly one outcome**: Every caller receives one value or one error
//! - **No unsafe code**: Safety > Performance

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod config;
mod error;
mod types;

pub use config::{
    BatchConfig, MAX_BACKEND_CALL_TIMEOUT, MAX_BATCH_SIZE, MAX_BATCH_TIMEOUT,
    MAX_EXECUTOR_CONCURRENCY,
};
pub use error::{BackendError, CancelReason, Error, Result};
pub use types::{BatchId, RequestId, RequestIdAllocator};
