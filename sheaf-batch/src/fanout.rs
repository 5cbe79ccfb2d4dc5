//! Result fan-out: one outcome, every member of the batch.

use sheaf_core::Result;

use crate::request::{Delivery, ReplySlot};

/// Counts from one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutReport {
    /// Slots whose caller was still attached.
    pub delivered: u32,
    /// Slots whose caller had already stopped waiting.
    pub abandoned: u32,
}

/// Writes `outcome` into every slot exactly once.
///
/// Never blocks and never stops early: abandoned slots are counted and skipped.
#[allow(clippy::needless_pass_by_value)]
pub fn fan_out<V: Clone>(slots: Vec<ReplySlot<V>>, outcome: Result<V>) -> FanOutReport {
    let mut report = FanOutReport::default();
    for slot in slots {
        match slot.deliver(outcome.clone()) {
            Delivery::Delivered => report.delivered += 1,
            Delivery::Abandoned => report.abandoned += 1,
        }
    }
    report
}
