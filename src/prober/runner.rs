//! Long-running probe loops
//!
//! `Prober::start` spawns one task per probe kind. Each task sleeps a jittered
//! interval, re-reads settings, then runs exactly one cycle before sleeping
//! again, so a kind never has more than one probe in flight. Both tasks stop
//! promptly when the shutdown token is cancelled, including mid-probe.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::settings::with_jitter;
use super::{ProbeKind, ProbeOutcome, Prober, SettingsHandle};

/// Lower bound on the sleep between cycles
const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Handles to the running probe loops
pub struct ProberHandle {
    shutdown: CancellationToken,
    read: JoinHandle<()>,
    write: JoinHandle<()>,
}

impl ProberHandle {
    /// Cancel both loops and wait for them to exit
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        self.join().await;
    }

    /// Wait for both loops to exit
    pub async fn join(self) {
        for (kind, handle) in [(ProbeKind::Read, self.read), (ProbeKind::Write, self.write)] {
            if let Err(e) = handle.await {
                tracing::error!(kind = %kind, error = %e, "Probe loop panicked");
            }
        }
    }
}

impl Prober {
    /// Spawn the read and write loops
    ///
    /// Loops run until `shutdown` is cancelled. Disabled kinds keep ticking so
    /// that enabling them through `settings` takes effect without a restart.
    pub fn start(self: Arc<Self>, settings: SettingsHandle, shutdown: CancellationToken) -> ProberHandle {
        let current = settings.current();
        info!(
            read_enabled = current.read.enabled,
            read_interval_ms = current.read.interval.as_millis() as u64,
            write_enabled = current.write.enabled,
            write_interval_ms = current.write.interval.as_millis() as u64,
            "Starting KV prober"
        );

        let read = tokio::spawn(
            self.clone()
                .run_loop(ProbeKind::Read, settings.clone(), shutdown.clone()),
        );
        let write = tokio::spawn(self.run_loop(ProbeKind::Write, settings, shutdown.clone()));

        ProberHandle {
            shutdown,
            read,
            write,
        }
    }

    async fn run_loop(self: Arc<Self>, kind: ProbeKind, settings: SettingsHandle, shutdown: CancellationToken) {
        let mut was_enabled = None;

        loop {
            let delay = {
                let current = settings.current();
                let mut rng = rand::thread_rng();
                with_jitter(current.kind(kind).interval, current.jitter, &mut rng).max(MIN_INTERVAL)
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            // Fresh snapshot: settings may have changed while sleeping
            let current = settings.current();
            let enabled = current.kind(kind).enabled;
            if was_enabled != Some(enabled) {
                info!(kind = %kind, enabled, "Probe loop state");
                was_enabled = Some(enabled);
            }

            let outcome = match kind {
                ProbeKind::Read => self.read_probe(&shutdown, &current).await,
                ProbeKind::Write => self.write_probe(&shutdown, &current).await,
            };
            if outcome == ProbeOutcome::Cancelled {
                break;
            }
        }

        debug!(kind = %kind, "Probe loop stopped");
    }
}
