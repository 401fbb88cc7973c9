//! Capacity-driven eviction.
//!
//! Both stores evict exactly one entry, the one with the oldest timestamp,
//! whenever an insert pushes them past capacity. Among entries sharing a
//! timestamp the earliest inserted goes first.
//!
//! ```text
//!   add ──▶ [ (t0,#0) (t1,#1) (t1,#2) (t3,#3) ] ──▶ pop_oldest() = (t0,#0)
//!            └────────── ordered by (timestamp, insertion seq) ──────────┘
//! ```
//!
//! The queue is an ordered set, so push and pop are O(log n).

use std::collections::BTreeSet;

use crate::types::Timestamp;

/// Oldest-first eviction order over handles of type `H`.
#[derive(Debug, Clone)]
pub struct EvictionQueue<H> {
    order: BTreeSet<(Timestamp, u64, H)>,
}

impl<H> Default for EvictionQueue<H> {
    fn default() -> Self {
        Self {
            order: BTreeSet::new(),
        }
    }
}

impl<H: Ord + Copy> EvictionQueue<H> {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track an entry inserted with sequence number `seq`.
    pub fn push(&mut self, timestamp: Timestamp, seq: u64, handle: H) {
        self.order.insert((timestamp, seq, handle));
    }

    /// Remove and return the next entry to evict.
    pub fn pop_oldest(&mut self) -> Option<H> {
        self.order.pop_first().map(|(_, _, h)| h)
    }

    /// Number of tracked entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Forget every entry.
    pub fn clear(&mut self) {
        self.order.clear();
    }
}

/// Whether a store holding `len` entries must evict to respect `capacity`.
#[must_use]
pub fn over_capacity(len: usize, capacity: usize) -> bool {
    len > capacity
}
