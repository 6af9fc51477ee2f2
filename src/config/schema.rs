use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Read/write probe cadence and gating
    #[serde(default)]
    pub prober: ProberConfig,
    /// Target planning and quarantine
    #[serde(default)]
    pub planner: PlanningConfig,
    /// Prometheus endpoint
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// In-process demo store
    #[serde(default)]
    pub store: StoreConfig,
    /// How often the config file is re-read for live prober settings (milliseconds)
    #[serde(default = "default_settings_reload_ms")]
    pub settings_reload_ms: u64,
}

fn default_settings_reload_ms() -> u64 {
    10_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            prober: ProberConfig::default(),
            planner: PlanningConfig::default(),
            metrics: MetricsConfig::default(),
            store: StoreConfig::default(),
            settings_reload_ms: default_settings_reload_ms(),
        }
    }
}

// ============================================================================
// Prober Configuration
// ============================================================================

/// Probe loop configuration; every field is re-read while running
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProberConfig {
    #[serde(default)]
    pub read: ReadProbeConfig,
    #[serde(default)]
    pub write: WriteProbeConfig,
    /// Fraction of the interval by which each sleep is randomly stretched or shrunk
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_jitter() -> f64 {
    0.25
}

impl Default for ProberConfig {
    fn default() -> Self {
        Self {
            read: ReadProbeConfig::default(),
            write: WriteProbeConfig::default(),
            jitter: default_jitter(),
        }
    }
}

/// Read probe: point read of a range probe key
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReadProbeConfig {
    /// Probing must be explicitly enabled
    #[serde(default)]
    pub enabled: bool,
    /// Interval between probes (milliseconds)
    #[serde(default = "default_read_interval_ms")]
    pub interval_ms: u64,
    /// Timeout for a single probe (milliseconds)
    #[serde(default = "default_read_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_read_interval_ms() -> u64 {
    60_000
}

fn default_read_timeout_ms() -> u64 {
    2_000
}

impl Default for ReadProbeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: default_read_interval_ms(),
            timeout_ms: default_read_timeout_ms(),
        }
    }
}

/// Write probe: put + delete of a range probe key in one transaction
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WriteProbeConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Interval between probes (milliseconds)
    #[serde(default = "default_write_interval_ms")]
    pub interval_ms: u64,
    /// Timeout for a single probe transaction (milliseconds)
    #[serde(default = "default_write_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_write_interval_ms() -> u64 {
    10_000
}

fn default_write_timeout_ms() -> u64 {
    4_000
}

impl Default for WriteProbeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: default_write_interval_ms(),
            timeout_ms: default_write_timeout_ms(),
        }
    }
}

// ============================================================================
// Planner Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlanningConfig {
    /// How long a failing range is skipped by planning (milliseconds)
    #[serde(default = "default_quarantine_ms")]
    pub quarantine_ms: u64,
    /// Minimum interval between range topology scans (milliseconds)
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,
    /// Use one planner for both probe kinds instead of one each
    #[serde(default)]
    pub shared: bool,
}

fn default_quarantine_ms() -> u64 {
    300_000
}

fn default_refresh_interval_ms() -> u64 {
    60_000
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self {
            quarantine_ms: default_quarantine_ms(),
            refresh_interval_ms: default_refresh_interval_ms(),
            shared: false,
        }
    }
}

// ============================================================================
// Metrics / Store Configuration
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_addr")]
    pub listen_addr: String,
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_addr() -> String {
    "127.0.0.1:9464".to_string()
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen_addr: default_metrics_addr(),
        }
    }
}

/// Shape of the in-process store the binary probes
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Number of ranges to pre-split
    #[serde(default = "default_store_ranges")]
    pub ranges: usize,
}

fn default_store_ranges() -> usize {
    16
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            ranges: default_store_ranges(),
        }
    }
}
