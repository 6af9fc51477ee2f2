//! Cursor-sweep planner over the range topology
//!
//! Ranges are kept sorted by start key in a single owned arena. Each call to
//! `next` plans the first non-quarantined range strictly after the cursor, so
//! consecutive plans walk the keyspace monotonically and wrap. Every range is
//! revisited within one full sweep, which bounds how long a range can go
//! unvalidated.
//!
//! Quarantine policy:
//! - a failed probe quarantines its range; a successful probe releases it
//! - entries decay `quarantine_ttl` after the last failure
//! - if a full sweep finds every range quarantined, the quarantine is cleared
//!   and the range at the cursor is planned anyway, so planning never starves

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PlanningConfig;
use crate::store::{RangeDescriptor, RangeTopology};

use super::quarantine::Quarantine;
use super::{PlanError, Planner, Step, StepOutcome};

/// Planner configuration
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// How long a failed range stays out of rotation
    pub quarantine_ttl: Duration,
    /// Minimum time between topology scans while the cache is non-empty
    pub refresh_interval: Duration,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            quarantine_ttl: Duration::from_secs(300),
            refresh_interval: Duration::from_secs(60),
        }
    }
}

impl From<&PlanningConfig> for PlannerConfig {
    fn from(settings: &PlanningConfig) -> Self {
        Self {
            quarantine_ttl: Duration::from_millis(settings.quarantine_ms),
            refresh_interval: Duration::from_millis(settings.refresh_interval_ms),
        }
    }
}

/// All mutable planner state, guarded by one lock
#[derive(Debug)]
struct PlannerState {
    /// Cached topology sorted by start key
    ranges: Vec<RangeDescriptor>,
    refreshed_at: Option<Instant>,
    /// Start key of the most recently planned range
    cursor: Option<Vec<u8>>,
    quarantine: Quarantine,
}

impl PlannerState {
    fn new(quarantine_ttl: Duration) -> Self {
        Self {
            ranges: Vec::new(),
            refreshed_at: None,
            cursor: None,
            quarantine: Quarantine::new(quarantine_ttl),
        }
    }

    fn needs_refresh(&self, now: Instant, refresh_interval: Duration) -> bool {
        if self.ranges.is_empty() {
            return true;
        }
        match self.refreshed_at {
            Some(at) => now.saturating_duration_since(at) >= refresh_interval,
            None => true,
        }
    }

    /// Replace the cached topology; the cursor is key-based so it carries over
    fn install(&mut self, mut ranges: Vec<RangeDescriptor>, now: Instant) {
        ranges.sort_by(|a, b| a.start_key.cmp(&b.start_key));
        ranges.dedup_by(|a, b| a.start_key == b.start_key);
        self.quarantine
            .retain_ranges(|id| ranges.iter().any(|r| r.range_id == id));
        self.ranges = ranges;
        self.refreshed_at = Some(now);
    }

    /// Index of the first range strictly after the cursor, wrapping
    fn cursor_index(&self) -> usize {
        match &self.cursor {
            None => 0,
            Some(cursor) => {
                let idx = self
                    .ranges
                    .partition_point(|r| r.start_key.as_slice() <= cursor.as_slice());
                if idx >= self.ranges.len() {
                    0
                } else {
                    idx
                }
            }
        }
    }

    fn plan(&mut self, now: Instant) -> Option<Step> {
        let len = self.ranges.len();
        if len == 0 {
            return None;
        }

        let expired = self.quarantine.expire(now);
        if expired > 0 {
            debug!(expired, "Released decayed quarantine entries");
        }

        let start = self.cursor_index();
        let eligible = (0..len)
            .map(|offset| (start + offset) % len)
            .find(|&idx| !self.quarantine.contains(self.ranges[idx].range_id, now));

        let idx = match eligible {
            Some(idx) => idx,
            None => {
                warn!(
                    quarantined = self.quarantine.len(),
                    "Every range is quarantined; clearing quarantine"
                );
                self.quarantine.clear();
                start
            }
        };

        let desc = &self.ranges[idx];
        self.cursor = Some(desc.start_key.clone());
        Some(Step::for_range(desc))
    }

    fn record(&mut self, step: &Step, outcome: StepOutcome, now: Instant) {
        match outcome {
            StepOutcome::Failure => self.quarantine.insert(step.range_id, now),
            StepOutcome::Success => {
                if self.quarantine.remove(step.range_id) {
                    debug!(range_id = %step.range_id, "Range released from quarantine");
                }
            }
            StepOutcome::Cancelled => {}
        }
    }
}

/// Planner that sweeps the live range topology
pub struct RangePlanner {
    topology: Arc<dyn RangeTopology>,
    config: PlannerConfig,
    state: Mutex<PlannerState>,
}

impl RangePlanner {
    pub fn new(topology: Arc<dyn RangeTopology>, config: PlannerConfig) -> Self {
        let state = Mutex::new(PlannerState::new(config.quarantine_ttl));
        Self {
            topology,
            config,
            state,
        }
    }

    /// Number of ranges in the cached topology
    pub fn cached_ranges(&self) -> usize {
        self.state.lock().ranges.len()
    }

    async fn refresh(&self, ctx: &CancellationToken) -> Result<(), PlanError> {
        let result = self.topology.scan_ranges(ctx).await;
        if ctx.is_cancelled() {
            return Err(PlanError::Cancelled);
        }

        let now = Instant::now();
        let mut state = self.state.lock();
        match result {
            Ok(ranges) => {
                let before = state.ranges.len();
                state.install(ranges, now);
                if before != state.ranges.len() {
                    info!(ranges = state.ranges.len(), "Range topology refreshed");
                }
                Ok(())
            }
            Err(e) if state.ranges.is_empty() => Err(PlanError::Topology(e)),
            Err(e) => {
                // Stale descriptors still address real ranges
                warn!(error = %e, cached = state.ranges.len(), "Topology refresh failed, planning against cached ranges");
                state.refreshed_at = Some(now);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Planner for RangePlanner {
    async fn next(&self, ctx: &CancellationToken) -> Result<Step, PlanError> {
        let needs_refresh = self
            .state
            .lock()
            .needs_refresh(Instant::now(), self.config.refresh_interval);
        if needs_refresh {
            self.refresh(ctx).await?;
        }

        self.state
            .lock()
            .plan(Instant::now())
            .ok_or(PlanError::EmptyKeyspace)
    }

    fn report(&self, step: &Step, outcome: StepOutcome) {
        self.state.lock().record(step, outcome, Instant::now());
    }

    fn quarantined(&self) -> usize {
        self.state.lock().quarantine.len()
    }
}
