//! Probe planning
//!
//! A planner decides which range the next probe targets. This module provides:
//! - `Step`, the immutable unit of planned work
//! - the `Planner` contract consumed by the prober
//! - `RangePlanner`, which sweeps the sorted range topology with a cursor and
//!   quarantines ranges that recently failed

mod quarantine;
mod range_planner;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::store::{RangeDescriptor, RangeId, StoreError};

pub use quarantine::Quarantine;
pub use range_planner::{PlannerConfig, RangePlanner};

/// A planned probe target, produced once and consumed once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Range-local key the probe reads or writes
    pub key: Vec<u8>,
    /// Range the key is addressed to
    pub range_id: RangeId,
    /// Start key of the range when it was planned
    pub start_key: Vec<u8>,
}

impl Step {
    pub fn for_range(desc: &RangeDescriptor) -> Self {
        Self {
            key: desc.probe_key(),
            range_id: desc.range_id,
            start_key: desc.start_key.clone(),
        }
    }
}

/// Outcome of executing a step, fed back into the planner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Success,
    Failure,
    /// Aborted by shutdown; says nothing about range health
    Cancelled,
}

/// Planning failed to produce a target at all
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("Failed to read range topology: {0}")]
    Topology(#[source] StoreError),
    #[error("Keyspace has no ranges")]
    EmptyKeyspace,
    #[error("Planning cancelled")]
    Cancelled,
}

/// Produces probe targets
///
/// Implementations shared between probe loops must serialize access to their
/// state internally.
#[async_trait]
pub trait Planner: Send + Sync + 'static {
    /// Plan the next probe target
    async fn next(&self, ctx: &CancellationToken) -> Result<Step, PlanError>;

    /// Feed back the outcome of executing `step`
    fn report(&self, _step: &Step, _outcome: StepOutcome) {}

    /// Number of ranges currently excluded from planning
    fn quarantined(&self) -> usize {
        0
    }
}
