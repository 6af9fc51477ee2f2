//! Read and write probe cycles
//!
//! One cycle of either kind:
//! 1. skip entirely if the kind is disabled (no planner or store access)
//! 2. plan a step; a planning failure counts only against planning metrics
//! 3. count an attempt, execute against the store, record success latency or failure
//! 4. report the outcome to the planner so it can quarantine failing ranges
//!
//! Cancellation of the caller's token is a distinct outcome and never counts
//! as a probe failure.

mod runner;
mod settings;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::PlanningConfig;
use crate::metrics::ProberMetrics;
use crate::planner::{PlanError, Planner, PlannerConfig, RangePlanner, Step, StepOutcome};
use crate::store::{txn_body, KvStore, RangeTopology, StoreError};

pub use runner::ProberHandle;
pub use settings::{with_jitter, ProbeKindSettings, ProbeSettings, SettingsHandle};

/// Value written (and immediately deleted) by write probes
pub const PROBE_VALUE: &[u8] = b"kvprober";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeKind {
    Read,
    Write,
}

impl ProbeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeKind::Read => "read",
            ProbeKind::Write => "write",
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a single probe cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Kind disabled; nothing was touched
    Disabled,
    /// No target could be planned
    PlanFailed,
    Success { latency: Duration },
    /// The store operation failed or timed out
    Failed,
    /// The caller's token was cancelled mid-cycle
    Cancelled,
}

/// Why a probe's store operation did not succeed
#[derive(Debug, thiserror::Error)]
enum ExecError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("Probe cancelled")]
    Cancelled,
}

/// Run a store operation bounded by `timeout` and the caller's token
async fn execute<T>(
    ctx: &CancellationToken,
    timeout: Duration,
    op: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, ExecError> {
    let bounded = async move {
        if timeout.is_zero() {
            Ok::<_, tokio::time::error::Elapsed>(op.await)
        } else {
            tokio::time::timeout(timeout, op).await
        }
    };

    tokio::select! {
        biased;
        _ = ctx.cancelled() => Err(ExecError::Cancelled),
        result = bounded => match result {
            Ok(Ok(value)) => Ok(value),
            // Errors caused by shutdown are not probe failures
            Ok(Err(_)) if ctx.is_cancelled() => Err(ExecError::Cancelled),
            Ok(Err(e)) => Err(ExecError::Store(e)),
            Err(_) => Err(ExecError::Timeout(timeout)),
        },
    }
}

/// Everything a prober needs, injected at construction
pub struct ProberOpts {
    pub store: Arc<dyn KvStore>,
    pub read_planner: Arc<dyn Planner>,
    pub write_planner: Arc<dyn Planner>,
    pub metrics: Arc<ProberMetrics>,
}

/// Black-box prober of the store's read and write paths
pub struct Prober {
    store: Arc<dyn KvStore>,
    read_planner: Arc<dyn Planner>,
    write_planner: Arc<dyn Planner>,
    metrics: Arc<ProberMetrics>,
}

impl Prober {
    pub fn new(opts: ProberOpts) -> Self {
        Self {
            store: opts.store,
            read_planner: opts.read_planner,
            write_planner: opts.write_planner,
            metrics: opts.metrics,
        }
    }

    /// Create a prober planning over `topology` with range planners
    ///
    /// Read and write loops get their own planner unless `planning.shared` is set.
    pub fn with_range_planners(
        store: Arc<dyn KvStore>,
        topology: Arc<dyn RangeTopology>,
        planning: &PlanningConfig,
        metrics: Arc<ProberMetrics>,
    ) -> Self {
        let config = PlannerConfig::from(planning);
        let read_planner: Arc<dyn Planner> =
            Arc::new(RangePlanner::new(topology.clone(), config.clone()));
        let write_planner: Arc<dyn Planner> = if planning.shared {
            read_planner.clone()
        } else {
            Arc::new(RangePlanner::new(topology, config))
        };

        Self::new(ProberOpts {
            store,
            read_planner,
            write_planner,
            metrics,
        })
    }

    pub fn metrics(&self) -> &ProberMetrics {
        &self.metrics
    }

    fn planner(&self, kind: ProbeKind) -> &dyn Planner {
        match kind {
            ProbeKind::Read => self.read_planner.as_ref(),
            ProbeKind::Write => self.write_planner.as_ref(),
        }
    }

    /// Run one read probe cycle: plan a step, then read its key
    pub async fn read_probe(&self, ctx: &CancellationToken, settings: &ProbeSettings) -> ProbeOutcome {
        let kind = ProbeKind::Read;
        if !settings.read.enabled {
            return ProbeOutcome::Disabled;
        }

        let step = match self.plan(kind, ctx).await {
            Ok(step) => step,
            Err(outcome) => return outcome,
        };

        self.metrics.read_probe_attempts.inc();
        let started = Instant::now();
        let result = execute(ctx, settings.read.timeout, self.store.get(ctx, &step.key))
            .await
            .map(|_| ());
        self.finish(kind, &step, started, result)
    }

    /// Run one write probe cycle: plan a step, then put and delete its key in a transaction
    pub async fn write_probe(&self, ctx: &CancellationToken, settings: &ProbeSettings) -> ProbeOutcome {
        let kind = ProbeKind::Write;
        if !settings.write.enabled {
            return ProbeOutcome::Disabled;
        }

        let step = match self.plan(kind, ctx).await {
            Ok(step) => step,
            Err(outcome) => return outcome,
        };

        // Counted before the transaction opens, whatever fails after this point
        self.metrics.write_probe_attempts.inc();
        let started = Instant::now();

        let key = step.key.clone();
        let body = txn_body(move |txn| {
            let key = key.clone();
            async move {
                txn.put(&key, PROBE_VALUE).await?;
                txn.del(&key).await
            }
            .boxed()
        });
        let result = execute(ctx, settings.write.timeout, self.store.run_in_txn(ctx, &body)).await;
        self.finish(kind, &step, started, result)
    }

    async fn plan(&self, kind: ProbeKind, ctx: &CancellationToken) -> Result<Step, ProbeOutcome> {
        self.metrics.probe_plan_attempts.inc();

        let result = tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(PlanError::Cancelled),
            result = self.planner(kind).next(ctx) => result,
        };

        match result {
            Ok(step) => Ok(step),
            Err(PlanError::Cancelled) => Err(ProbeOutcome::Cancelled),
            Err(_) if ctx.is_cancelled() => Err(ProbeOutcome::Cancelled),
            Err(e) => {
                self.metrics.probe_plan_failures.inc();
                warn!(kind = %kind, error = %e, "Probe planning failed");
                Err(ProbeOutcome::PlanFailed)
            }
        }
    }

    fn finish(
        &self,
        kind: ProbeKind,
        step: &Step,
        started: Instant,
        result: Result<(), ExecError>,
    ) -> ProbeOutcome {
        let planner = self.planner(kind);
        let outcome = match result {
            Ok(()) => {
                let latency = started.elapsed();
                self.metrics.latency(kind).observe(latency.as_secs_f64());
                debug!(kind = %kind, range_id = %step.range_id, latency_ms = latency.as_millis() as u64, "Probe succeeded");
                planner.report(step, StepOutcome::Success);
                ProbeOutcome::Success { latency }
            }
            Err(ExecError::Cancelled) => {
                debug!(kind = %kind, range_id = %step.range_id, "Probe cancelled");
                planner.report(step, StepOutcome::Cancelled);
                ProbeOutcome::Cancelled
            }
            Err(e) => {
                self.metrics.failures(kind).inc();
                warn!(
                    kind = %kind,
                    range_id = %step.range_id,
                    start_key = ?String::from_utf8_lossy(&step.start_key),
                    error = %e,
                    "Probe failed"
                );
                planner.report(step, StepOutcome::Failure);
                ProbeOutcome::Failed
            }
        };
        self.metrics.set_quarantined(kind, planner.quarantined());
        outcome
    }
}
