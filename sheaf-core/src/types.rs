//! Identifiers for requests and batches.
//!
//! Both are plain counters scoped to one coordinator. Wrapping them keeps a
//! request id from ever being logged or compared as a batch id.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Declares a counter-backed id with a short display prefix.
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident => $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[repr(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Wraps a raw counter value.
            #[inline]
            #[must_use]
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            /// Returns the raw counter value.
            #[inline]
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }

            /// Returns the id issued after this one.
            ///
            /// # Panics
            /// Panics if the counter is exhausted.
            #[inline]
            #[must_use]
            pub const fn next(self) -> Self {
                assert!(self.0 < u64::MAX, "id counter exhausted");
                Self(self.0 + 1)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", $prefix, self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}-{}", $prefix, self.0)
            }
        }
    };
}

define_id! {
    /// Identifies one caller's request within a coordinator.
    RequestId => "req"
}

define_id! {
    /// Identifies a batch closed by the batcher.
    BatchId => "batch"
}

/// Hands out request ids to concurrent callers.
///
/// Ids are unique per allocator and increase in allocation order.
#[derive(Debug, Default)]
pub struct RequestIdAllocator {
    next: AtomicU64,
}

impl RequestIdAllocator {
    /// Creates an allocator whose first id is zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
        }
    }

    /// Returns a fresh id.
    pub fn allocate(&self) -> RequestId {
        RequestId::new(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns how many ids have been handed out.
    #[must_use]
    pub fn allocated(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}
