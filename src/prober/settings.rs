//! Live prober settings
//!
//! Operators toggle probing and change cadence while the process runs. Loops
//! never cache these values: each tick takes a fresh snapshot from the
//! `SettingsHandle` and threads it into the cycle call.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rand::Rng;

use crate::config::ProberConfig;

use super::ProbeKind;

/// Settings for one probe kind
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeKindSettings {
    pub enabled: bool,
    pub interval: Duration,
    /// Zero disables the per-probe timeout
    pub timeout: Duration,
}

/// Snapshot of every live prober setting
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeSettings {
    pub read: ProbeKindSettings,
    pub write: ProbeKindSettings,
    /// Fraction of the interval each sleep is randomly stretched or shrunk by
    pub jitter: f64,
}

impl ProbeSettings {
    pub fn kind(&self, kind: ProbeKind) -> &ProbeKindSettings {
        match kind {
            ProbeKind::Read => &self.read,
            ProbeKind::Write => &self.write,
        }
    }
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self::from(&ProberConfig::default())
    }
}

impl From<&ProberConfig> for ProbeSettings {
    fn from(config: &ProberConfig) -> Self {
        Self {
            read: ProbeKindSettings {
                enabled: config.read.enabled,
                interval: Duration::from_millis(config.read.interval_ms),
                timeout: Duration::from_millis(config.read.timeout_ms),
            },
            write: ProbeKindSettings {
                enabled: config.write.enabled,
                interval: Duration::from_millis(config.write.interval_ms),
                timeout: Duration::from_millis(config.write.timeout_ms),
            },
            jitter: config.jitter,
        }
    }
}

/// Shared, externally mutable settings source
#[derive(Debug, Clone, Default)]
pub struct SettingsHandle {
    inner: Arc<RwLock<ProbeSettings>>,
}

impl SettingsHandle {
    pub fn new(settings: ProbeSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    /// Current settings snapshot
    pub fn current(&self) -> ProbeSettings {
        self.inner.read().clone()
    }

    /// Replace all settings; returns true if anything changed
    pub fn update(&self, settings: ProbeSettings) -> bool {
        let mut current = self.inner.write();
        if *current == settings {
            return false;
        }
        *current = settings;
        true
    }

    /// Mutate settings in place
    pub fn modify(&self, f: impl FnOnce(&mut ProbeSettings)) {
        f(&mut self.inner.write());
    }
}

/// Randomly stretch or shrink `interval` by up to `jitter` of itself
///
/// `jitter` is clamped to `[0, 1]`; 0.25 yields a value in `[0.75, 1.25] * interval`.
pub fn with_jitter(interval: Duration, jitter: f64, rng: &mut impl Rng) -> Duration {
    let jitter = if jitter.is_finite() { jitter.clamp(0.0, 1.0) } else { 0.0 };
    if jitter == 0.0 {
        return interval;
    }
    let frac = 1.0 + (2.0 * rng.gen::<f64>() - 1.0) * jitter;
    interval.mul_f64(frac.max(0.0))
}
