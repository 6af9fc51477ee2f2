//! Prometheus metrics for the KV prober
//!
//! Counters are monotonic for the process lifetime and never reset. The
//! binary exposes them over HTTP for Prometheus scraping.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntGaugeVec, Opts, Registry, TextEncoder,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::prober::ProbeKind;

/// Probe metrics collection
pub struct ProberMetrics {
    /// Registry for all metrics
    pub registry: Registry,

    // Planning metrics
    /// Planning attempts, one per enabled cycle of either kind
    pub probe_plan_attempts: IntCounter,
    /// Planning attempts that produced no target
    pub probe_plan_failures: IntCounter,

    // Read probe metrics
    /// Read probes issued (planning succeeded)
    pub read_probe_attempts: IntCounter,
    /// Read probes that failed or timed out
    pub read_probe_failures: IntCounter,
    /// Latency of successful read probes (in seconds)
    pub read_probe_latency: Histogram,

    // Write probe metrics
    /// Write probes issued (planning succeeded)
    pub write_probe_attempts: IntCounter,
    /// Write probes whose transaction failed at any step
    pub write_probe_failures: IntCounter,
    /// Latency of successful write probes (in seconds)
    pub write_probe_latency: Histogram,

    // Planner metrics
    /// Ranges currently quarantined, by probe kind
    pub quarantined_ranges: IntGaugeVec,
}

fn latency_buckets() -> Vec<f64> {
    vec![
        0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ]
}

impl ProberMetrics {
    /// Create a new metrics collection with its own registry
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let probe_plan_attempts = IntCounter::new(
            "kv_prober_planning_attempts_total",
            "Number of attempts at planning out probes",
        )?;
        let probe_plan_failures = IntCounter::new(
            "kv_prober_planning_failures_total",
            "Number of attempts at planning out probes that failed",
        )?;

        let read_probe_attempts = IntCounter::new(
            "kv_prober_read_attempts_total",
            "Number of attempts made to read probe the KV layer",
        )?;
        let read_probe_failures = IntCounter::new(
            "kv_prober_read_failures_total",
            "Number of attempts made to read probe the KV layer that failed",
        )?;
        let read_probe_latency = Histogram::with_opts(
            HistogramOpts::new(
                "kv_prober_read_latency_seconds",
                "Latency of successful KV read probe attempts",
            )
            .buckets(latency_buckets()),
        )?;

        let write_probe_attempts = IntCounter::new(
            "kv_prober_write_attempts_total",
            "Number of attempts made to write probe the KV layer",
        )?;
        let write_probe_failures = IntCounter::new(
            "kv_prober_write_failures_total",
            "Number of attempts made to write probe the KV layer that failed",
        )?;
        let write_probe_latency = Histogram::with_opts(
            HistogramOpts::new(
                "kv_prober_write_latency_seconds",
                "Latency of successful KV write probe attempts",
            )
            .buckets(latency_buckets()),
        )?;

        let quarantined_ranges = IntGaugeVec::new(
            Opts::new(
                "kv_prober_quarantined_ranges",
                "Number of ranges currently skipped by planning after a failed probe",
            ),
            &["kind"], // read, write
        )?;

        registry.register(Box::new(probe_plan_attempts.clone()))?;
        registry.register(Box::new(probe_plan_failures.clone()))?;
        registry.register(Box::new(read_probe_attempts.clone()))?;
        registry.register(Box::new(read_probe_failures.clone()))?;
        registry.register(Box::new(read_probe_latency.clone()))?;
        registry.register(Box::new(write_probe_attempts.clone()))?;
        registry.register(Box::new(write_probe_failures.clone()))?;
        registry.register(Box::new(write_probe_latency.clone()))?;
        registry.register(Box::new(quarantined_ranges.clone()))?;

        Ok(Self {
            registry,
            probe_plan_attempts,
            probe_plan_failures,
            read_probe_attempts,
            read_probe_failures,
            read_probe_latency,
            write_probe_attempts,
            write_probe_failures,
            write_probe_latency,
            quarantined_ranges,
        })
    }

    /// Attempt counter for a probe kind
    pub fn attempts(&self, kind: ProbeKind) -> &IntCounter {
        match kind {
            ProbeKind::Read => &self.read_probe_attempts,
            ProbeKind::Write => &self.write_probe_attempts,
        }
    }

    /// Failure counter for a probe kind
    pub fn failures(&self, kind: ProbeKind) -> &IntCounter {
        match kind {
            ProbeKind::Read => &self.read_probe_failures,
            ProbeKind::Write => &self.write_probe_failures,
        }
    }

    /// Latency histogram for a probe kind
    pub fn latency(&self, kind: ProbeKind) -> &Histogram {
        match kind {
            ProbeKind::Read => &self.read_probe_latency,
            ProbeKind::Write => &self.write_probe_latency,
        }
    }

    /// Update the quarantine gauge for a probe kind
    pub fn set_quarantined(&self, kind: ProbeKind, count: usize) {
        self.quarantined_ranges
            .with_label_values(&[kind.as_str()])
            .set(count as i64);
    }

    /// Get metrics as Prometheus text format
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<ProberMetrics>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match req.uri().path() {
        "/metrics" => match metrics.gather() {
            Ok(body) => {
                let mut response = text_response(StatusCode::OK, body);
                response.headers_mut().insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
                );
                response
            }
            Err(e) => {
                error!(error = %e, "Failed to encode metrics");
                text_response(StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed")
            }
        },
        "/health" => text_response(StatusCode::OK, "OK"),
        _ => text_response(StatusCode::NOT_FOUND, "Not Found"),
    };
    Ok(response)
}

/// Serve the metrics HTTP endpoint until `shutdown` is cancelled
pub async fn start_metrics_server(
    addr: &str,
    metrics: Arc<ProberMetrics>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let addr: SocketAddr = addr.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "Metrics server listening");

    loop {
        let (stream, _) = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Metrics server shutting down");
                return Ok(());
            }
            accepted = listener.accept() => accepted?,
        };
        let io = TokioIo::new(stream);
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| handle_request(req, metrics.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!(error = %e, "Metrics server connection error");
            }
        });
    }
}
