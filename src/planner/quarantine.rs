//! Quarantine of recently failing ranges
//!
//! A range whose probe failed is skipped by planning until its entry decays
//! (`ttl` after the last failure) or a success clears it. This keeps one
//! known-bad range from consuming every probe slot while other ranges go
//! unvisited.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::store::RangeId;

/// Time-decaying set of quarantined ranges
#[derive(Debug)]
pub struct Quarantine {
    /// Range -> time of its most recent failure
    entries: HashMap<RangeId, Instant>,
    ttl: Duration,
}

impl Quarantine {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    /// Record a failure for `range_id` at `now`, refreshing any existing entry
    pub fn insert(&mut self, range_id: RangeId, now: Instant) {
        self.entries.insert(range_id, now);
    }

    /// Clear `range_id`; returns true if it was quarantined
    pub fn remove(&mut self, range_id: RangeId) -> bool {
        self.entries.remove(&range_id).is_some()
    }

    /// Whether `range_id` is quarantined and its entry has not decayed at `now`
    pub fn contains(&self, range_id: RangeId, now: Instant) -> bool {
        self.entries
            .get(&range_id)
            .is_some_and(|failed_at| now.saturating_duration_since(*failed_at) < self.ttl)
    }

    /// Drop every entry that has decayed at `now`; returns how many were dropped
    pub fn expire(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries
            .retain(|_, failed_at| now.saturating_duration_since(*failed_at) < ttl);
        before - self.entries.len()
    }

    /// Keep only entries whose range still exists
    pub fn retain_ranges(&mut self, mut exists: impl FnMut(RangeId) -> bool) {
        self.entries.retain(|range_id, _| exists(*range_id));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
