//! Sheaf Tests - integration and property tests for the request batcher.
//!
//! Tests drive a real `Coordinator` on a paused tokio clock against an
//! instrumented backend, then check delivery properties over what every
//! caller observed.
//!
//! ## Test Organization
//!
//! **Integration Tests** (`*_tests.rs`):
//! - `coordinator_tests`: end-to-end delivery, batch sizing and timing
//! - `concurrency_tests`: executor pool limits and staggered-arrival stress
//! - `cancellation_tests`: caller cancellation, deadlines and shutdown
//!
//! **Support Modules**:
//! - `backends`: `RecordingBackend`, which records batches and in-flight calls
//! - `properties`: `DeliveryChecker` and the `Violation`s it reports
//! - `scenarios`: reusable configurations, seeds and arrival drivers
//!
//! ## Naming Conventions
//!
//! - Integration tests: `test_<component>_<scenario>`
//! - Unit tests: Inline in each crate under `#[cfg(test)]`

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod backends;
pub mod properties;
pub mod scenarios;
