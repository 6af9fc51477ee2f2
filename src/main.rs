use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use kvprober::config::{self, Config};
use kvprober::metrics::{start_metrics_server, ProberMetrics};
use kvprober::prober::{ProbeSettings, Prober, ProberHandle, SettingsHandle};
use kvprober::store::MemStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    // Load configuration
    let (config, config_path) = load_or_default_config(std::env::args().nth(1).map(PathBuf::from));

    let store = Arc::new(MemStore::with_range_count(config.store.ranges));
    info!(ranges = store.ranges().len(), "In-memory store ready");

    let metrics = Arc::new(ProberMetrics::new()?);
    let prober = Arc::new(Prober::with_range_planners(
        store.clone(),
        store,
        &config.planner,
        metrics.clone(),
    ));

    let shutdown = CancellationToken::new();
    let settings = SettingsHandle::new(ProbeSettings::from(&config.prober));
    let handle = prober.start(settings.clone(), shutdown.clone());

    let metrics_task = if config.metrics.enabled {
        let addr = config.metrics.listen_addr.clone();
        let shutdown = shutdown.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = start_metrics_server(&addr, metrics, shutdown).await {
                error!(addr = %addr, error = %e, "Metrics server failed");
            }
        }))
    } else {
        None
    };

    let reload_task = config_path.map(|path| {
        let interval = Duration::from_millis(config.settings_reload_ms.max(100));
        tokio::spawn(reload_settings(path, interval, settings, shutdown.clone()))
    });

    let tasks = [metrics_task, reload_task].into_iter().flatten().collect();
    shutdown_on(tokio::signal::ctrl_c(), shutdown, handle, tasks).await
}

/// Wait for `signal`, then stop and join everything
///
/// A failed signal listener still tears down before the error is returned.
async fn shutdown_on(
    signal: impl Future<Output = std::io::Result<()>>,
    shutdown: CancellationToken,
    handle: ProberHandle,
    tasks: Vec<JoinHandle<()>>,
) -> anyhow::Result<()> {
    let result = signal.await;
    match &result {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!(error = %e, "Failed to listen for shutdown signal, stopping"),
    }
    shutdown.cancel();

    handle.join().await;
    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "Background task ended abnormally");
        }
    }

    info!("KV prober stopped");
    result?;
    Ok(())
}

/// Re-read the config file periodically and push prober settings to the loops
///
/// A file that fails to load leaves the running settings untouched.
async fn reload_settings(
    path: PathBuf,
    interval: Duration,
    settings: SettingsHandle,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {}
        }

        match config::load_config(&path) {
            Ok(config) => {
                let next = ProbeSettings::from(&config.prober);
                if settings.update(next.clone()) {
                    info!(
                        path = %path.display(),
                        read_enabled = next.read.enabled,
                        read_interval_ms = next.read.interval.as_millis() as u64,
                        write_enabled = next.write.enabled,
                        write_interval_ms = next.write.interval.as_millis() as u64,
                        "Prober settings reloaded"
                    );
                }
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to reload config, keeping current settings");
            }
        }
    }
}

fn load_or_default_config(explicit: Option<PathBuf>) -> (Config, Option<PathBuf>) {
    let config_paths: Vec<PathBuf> = match explicit {
        Some(path) => vec![path],
        None => vec![
            PathBuf::from("config/kvprober.toml"),
            PathBuf::from("kvprober.toml"),
        ],
    };

    for path in config_paths {
        match config::load_config(&path) {
            Ok(config) => {
                info!(path = %path.display(), "Loaded configuration");
                return (config, Some(path));
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to load config");
            }
        }
    }

    info!("Using default configuration");
    (Config::default(), None)
}
