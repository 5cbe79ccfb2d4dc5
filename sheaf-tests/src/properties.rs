//! Delivery properties and their checker.
//!
//! A run is correct when every issued call got exactly one outcome, every
//! batch respected its size limit, every member of a batch saw the same
//! outcome, and the backend never ran more calls at once than the pool allows.
//!
//! The checker keys calls by their `u64` key, so scenarios that use it issue
//! each key once.

use std::collections::{BTreeMap, BTreeSet};

use sheaf_core::{Error, Result};

use crate::backends::{BatchReceipt, RecordedBatch};

// ============================================================================
// Violation Types
// ============================================================================

/// A broken delivery property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// A call was issued but never produced an outcome.
    LostCall {
        /// Key of the call.
        key: u64,
    },
    /// A call produced more than one outcome.
    DuplicateOutcome {
        /// Key of the call.
        key: u64,
        /// Outcomes observed.
        count: usize,
    },
    /// An outcome arrived for a key nobody asked for.
    UnexpectedOutcome {
        /// Key of the outcome.
        key: u64,
    },
    /// A batch held more requests than `batch_size`.
    OversizedBatch {
        /// Offending batch.
        batch_id: u64,
        /// Requests in the batch.
        len: usize,
        /// Configured limit.
        limit: u32,
    },
    /// An accepted key reached the backend a different number of times than it
    /// was submitted.
    BatchMembership {
        /// Key of the call.
        key: u64,
        /// Backend calls that carried the key.
        batched: usize,
    },
    /// A caller received a receipt for a batch that did not carry its key.
    Misdelivered {
        /// Key of the call.
        key: u64,
        /// Batch named in the receipt.
        batch_id: u64,
    },
    /// Members of one batch observed different outcomes.
    SplitOutcome {
        /// Offending batch.
        batch_id: u64,
        /// Distinct outcomes observed by its members.
        distinct: usize,
    },
    /// More backend calls ran at once than the executor allows.
    ConcurrencyExceeded {
        /// Highest concurrency observed.
        observed: u32,
        /// Configured limit.
        limit: u32,
    },
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LostCall { key } => write!(f, "Call {key} never produced an outcome"),
            Self::DuplicateOutcome { key, count } => {
                write!(f, "Call {key} produced {count} outcomes")
            }
            Self::UnexpectedOutcome { key } => write!(f, "Outcome for unissued key {key}"),
            Self::OversizedBatch {
                batch_id,
                len,
                limit,
            } => write!(f, "Batch {batch_id} held {len} requests (limit {limit})"),
            Self::BatchMembership { key, batched } => {
                write!(f, "Accepted key {key} reached the backend {batched} times")
            }
            Self::Misdelivered { key, batch_id } => {
                write!(f, "Call {key} got the receipt of batch {batch_id}, which lacks it")
            }
            Self::SplitOutcome { batch_id, distinct } => {
                write!(f, "Batch {batch_id} members saw {distinct} different outcomes")
            }
            Self::ConcurrencyExceeded { observed, limit } => {
                write!(f, "{observed} backend calls ran at once (limit {limit})")
            }
        }
    }
}

// ============================================================================
// Delivery Checker
// ============================================================================

/// Collects what every caller observed and checks it against the backend's
/// record.
#[derive(Debug, Default)]
pub struct DeliveryChecker {
    /// Keys issued by the scenario.
    issued: BTreeSet<u64>,
    /// Outcomes observed per key.
    outcomes: BTreeMap<u64, Vec<Result<BatchReceipt>>>,
}

impl DeliveryChecker {
    /// Creates a checker expecting one outcome for each of `keys`.
    #[must_use]
    pub fn new(keys: impl IntoIterator<Item = u64>) -> Self {
        Self {
            issued: keys.into_iter().collect(),
            outcomes: BTreeMap::new(),
        }
    }

    /// Records the outcome a caller observed.
    pub fn record(&mut self, key: u64, outcome: Result<BatchReceipt>) {
        self.outcomes.entry(key).or_default().push(outcome);
    }

    /// Returns the single outcome observed for `key`, if exactly one exists.
    #[must_use]
    pub fn outcome(&self, key: u64) -> Option<&Result<BatchReceipt>> {
        match self.outcomes.get(&key).map(Vec::as_slice) {
            Some([only]) => Some(only),
            _ => None,
        }
    }

    /// Returns how many recorded outcomes satisfy `predicate`.
    pub fn count_where(&self, predicate: impl Fn(&Result<BatchReceipt>) -> bool) -> usize {
        self.outcomes.values().flatten().filter(|o| predicate(o)).count()
    }

    /// Checks exactly-once delivery for every issued key.
    #[must_use]
    pub fn check_exactly_once(&self) -> Vec<Violation> {
        let mut violations = Vec::new();

        for &key in &self.issued {
            match self.outcomes.get(&key).map_or(0, Vec::len) {
                0 => violations.push(Violation::LostCall { key }),
                1 => {}
                count => violations.push(Violation::DuplicateOutcome { key, count }),
            }
        }
        for &key in self.outcomes.keys() {
            if !self.issued.contains(&key) {
                violations.push(Violation::UnexpectedOutcome { key });
            }
        }

        violations
    }

    /// Checks that no batch exceeded `batch_size`.
    #[must_use]
    pub fn check_batch_size(batches: &[RecordedBatch], batch_size: u32) -> Vec<Violation> {
        batches
            .iter()
            .filter(|b| b.keys.len() > batch_size as usize)
            .map(|b| Violation::OversizedBatch {
                batch_id: b.batch_id.get(),
                len: b.keys.len(),
                limit: batch_size,
            })
            .collect()
    }

    /// Checks that every accepted call reached the backend exactly once, and
    /// that each receipt names a batch that carried the caller's key.
    ///
    /// Calls cancelled before submission must not reach the backend at all.
    #[must_use]
    pub fn check_membership(&self, batches: &[RecordedBatch]) -> Vec<Violation> {
        let mut violations = Vec::new();

        let mut batched: BTreeMap<u64, usize> = BTreeMap::new();
        let mut carried: BTreeMap<u64, &RecordedBatch> = BTreeMap::new();
        for batch in batches {
            for &key in &batch.keys {
                *batched.entry(key).or_default() += 1;
                carried.insert(key, batch);
            }
        }

        for (&key, outcomes) in &self.outcomes {
            let accepted = outcomes
                .iter()
                .filter(|o| !matches!(o, Err(Error::SubmissionCancelled { .. })))
                .count();
            let seen = batched.get(&key).copied().unwrap_or(0);
            if seen != accepted {
                violations.push(Violation::BatchMembership { key, batched: seen });
            }

            for receipt in outcomes.iter().flatten() {
                let matches = carried
                    .get(&key)
                    .is_some_and(|b| b.batch_id == receipt.batch_id);
                if !matches {
                    violations.push(Violation::Misdelivered {
                        key,
                        batch_id: receipt.batch_id.get(),
                    });
                }
            }
        }

        violations
    }

    /// Checks that every member of each batch observed the same outcome.
    ///
    /// Callers that stopped waiting are skipped; their outcome went to an
    /// abandoned slot.
    #[must_use]
    pub fn check_uniform_outcome(&self, batches: &[RecordedBatch]) -> Vec<Violation> {
        let mut violations = Vec::new();

        for batch in batches {
            let mut distinct: Vec<&Result<BatchReceipt>> = Vec::new();
            for key in &batch.keys {
                let Some(outcome) = self.outcome(*key) else {
                    continue;
                };
                if matches!(outcome, Err(Error::CallerCancelled { .. })) {
                    continue;
                }
                if !distinct.contains(&outcome) {
                    distinct.push(outcome);
                }
            }
            if distinct.len() > 1 {
                violations.push(Violation::SplitOutcome {
                    batch_id: batch.batch_id.get(),
                    distinct: distinct.len(),
                });
            }
        }

        violations
    }

    /// Checks that the backend never ran more than `limit` calls at once.
    #[must_use]
    pub fn check_concurrency(max_in_flight: u32, limit: u32) -> Vec<Violation> {
        if max_in_flight > limit {
            vec![Violation::ConcurrencyExceeded {
                observed: max_in_flight,
                limit,
            }]
        } else {
            Vec::new()
        }
    }

    /// Runs every check.
    #[must_use]
    pub fn check_all(
        &self,
        batches: &[RecordedBatch],
        batch_size: u32,
        max_in_flight: u32,
        concurrency_limit: u32,
    ) -> Vec<Violation> {
        let mut violations = self.check_exactly_once();
        violations.extend(Self::check_batch_size(batches, batch_size));
        violations.extend(self.check_membership(batches));
        violations.extend(self.check_uniform_outcome(batches));
        violations.extend(Self::check_concurrency(max_in_flight, concurrency_limit));
        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheaf_core::{BackendError, BatchId, CancelReason};
    use std::time::Duration;
    use tokio::time::Instant;

    fn batch(id: u64, keys: &[u64]) -> RecordedBatch {
        RecordedBatch {
            batch_id: BatchId::new(id),
            keys: keys.to_vec(),
            started_at: Instant::now(),
            deadline_remaining: Duration::ZERO,
        }
    }

    fn receipt(id: u64, len: usize) -> Result<BatchReceipt> {
        Ok(BatchReceipt {
            batch_id: BatchId::new(id),
            len,
        })
    }

    #[tokio::test]
    async fn test_clean_run_has_no_violations() {
        let batches = vec![batch(0, &[1, 2]), batch(1, &[3])];
        let mut checker = DeliveryChecker::new([1, 2, 3]);
        checker.record(1, receipt(0, 2));
        checker.record(2, receipt(0, 2));
        checker.record(3, receipt(1, 1));

        assert!(checker.check_all(&batches, 2, 1, 2).is_empty());
    }

    #[tokio::test]
    async fn test_detects_lost_and_duplicate() {
        let mut checker = DeliveryChecker::new([1, 2]);
        checker.record(1, receipt(0, 1));
        checker.record(1, receipt(0, 1));

        let violations = checker.check_exactly_once();
        assert!(violations.contains(&Violation::LostCall { key: 2 }));
        assert!(violations.contains(&Violation::DuplicateOutcome { key: 1, count: 2 }));
    }

    #[tokio::test]
    async fn test_detects_oversized_batch() {
        let batches = vec![batch(4, &[1, 2, 3])];
        assert_eq!(
            DeliveryChecker::check_batch_size(&batches, 2),
            vec![Violation::OversizedBatch {
                batch_id: 4,
                len: 3,
                limit: 2
            }]
        );
    }

    #[tokio::test]
    async fn test_detects_split_outcome() {
        let batches = vec![batch(0, &[1, 2])];
        let mut checker = DeliveryChecker::new([1, 2]);
        checker.record(1, receipt(0, 2));
        checker.record(2, Err(Error::Backend(BackendError::failed("boom"))));

        assert_eq!(
            checker.check_uniform_outcome(&batches),
            vec![Violation::SplitOutcome {
                batch_id: 0,
                distinct: 2
            }]
        );
    }

    #[tokio::test]
    async fn test_cancelled_waiter_is_not_a_split() {
        let batches = vec![batch(0, &[1, 2])];
        let mut checker = DeliveryChecker::new([1, 2]);
        checker.record(1, receipt(0, 2));
        checker.record(
            2,
            Err(Error::CallerCancelled {
                reason: CancelReason::DeadlineExceeded,
            }),
        );

        assert!(checker.check_uniform_outcome(&batches).is_empty());
        assert!(checker.check_membership(&batches).is_empty());
    }

    #[tokio::test]
    async fn test_detects_misdelivery_and_membership() {
        let batches = vec![batch(0, &[1]), batch(1, &[2])];
        let mut checker = DeliveryChecker::new([1, 2, 3]);
        checker.record(1, receipt(1, 1));
        checker.record(2, receipt(1, 1));
        checker.record(
            3,
            Err(Error::SubmissionCancelled {
                reason: CancelReason::Cancelled,
            }),
        );

        assert_eq!(
            checker.check_membership(&batches),
            vec![Violation::Misdelivered { key: 1, batch_id: 1 }]
        );
    }

    #[tokio::test]
    async fn test_detects_concurrency_exceeded() {
        assert!(DeliveryChecker::check_concurrency(2, 2).is_empty());
        assert_eq!(
            DeliveryChecker::check_concurrency(3, 2),
            vec![Violation::ConcurrencyExceeded {
                observed: 3,
                limit: 2
            }]
        );
    }
}
