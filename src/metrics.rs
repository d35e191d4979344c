//! Prometheus metrics and the `/metrics` endpoint.

use crate::upload::UploadCycleReport;
use anyhow::{Context, Result};
use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, GaugeVec, Histogram, HistogramOpts, HistogramVec, Opts,
    Registry, TextEncoder,
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Metric name prefix for all agent metrics
const PREFIX: &str = "callup";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Upload cycle metrics
    pub static ref UPLOAD_CYCLES_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_upload_cycles_total"),
        "Total number of completed upload cycles"
    ).expect("Failed to create upload_cycles_total metric");

    pub static ref UPLOAD_CYCLE_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            format!("{PREFIX}_upload_cycle_duration_seconds"),
            "Upload cycle duration in seconds"
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 180.0, 600.0])
    ).expect("Failed to create upload_cycle_duration_seconds metric");

    pub static ref UPLOAD_ITEMS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_upload_items_total"), "Matched recordings by cycle outcome"),
        &["outcome"]
    ).expect("Failed to create upload_items_total metric");

    pub static ref UPLOAD_FAILURES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_upload_failures_total"), "Failed uploads by reason"),
        &["reason"]
    ).expect("Failed to create upload_failures_total metric");

    pub static ref RECORDINGS_SCANNED: Gauge = Gauge::new(
        format!("{PREFIX}_recordings_scanned"),
        "Recordings found by the last upload cycle scan"
    ).expect("Failed to create recordings_scanned metric");

    // Call state metrics
    pub static ref CALL_STATE_EVENTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_call_state_events_total"), "Emitted call state events"),
        &["state"]
    ).expect("Failed to create call_state_events_total metric");

    // Background job metrics
    pub static ref BACKGROUND_JOB_RUNNING: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_background_job_running"), "Whether a background job is running"),
        &["job_id"]
    ).expect("Failed to create background_job_running metric");

    pub static ref BACKGROUND_JOB_EXECUTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_background_job_executions_total"), "Background job executions"),
        &["job_id", "status"]
    ).expect("Failed to create background_job_executions_total metric");

    pub static ref BACKGROUND_JOB_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_background_job_duration_seconds"),
            "Background job duration in seconds"
        )
        .buckets(vec![0.1, 1.0, 10.0, 60.0, 300.0, 900.0]),
        &["job_id"]
    ).expect("Failed to create background_job_duration_seconds metric");

    pub static ref PROCESS_MEMORY_BYTES: Gauge = Gauge::new(
        format!("{PREFIX}_process_memory_bytes"),
        "Process memory usage in bytes"
    ).expect("Failed to create process_memory_bytes metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(UPLOAD_CYCLES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(UPLOAD_CYCLE_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(UPLOAD_ITEMS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(UPLOAD_FAILURES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(RECORDINGS_SCANNED.clone()));
    let _ = REGISTRY.register(Box::new(CALL_STATE_EVENTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_RUNNING.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_EXECUTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(PROCESS_MEMORY_BYTES.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Record the totals of a finished upload cycle
pub fn record_upload_cycle(report: &UploadCycleReport) {
    UPLOAD_CYCLES_TOTAL.inc();
    UPLOAD_CYCLE_DURATION_SECONDS.observe(report.duration_ms as f64 / 1000.0);
    RECORDINGS_SCANNED.set(report.scanned as f64);

    for (outcome, count) in [
        ("uploaded", report.uploaded),
        ("skipped", report.skipped),
        ("no_credential", report.no_credential),
        ("failed", report.failed),
    ] {
        UPLOAD_ITEMS_TOTAL
            .with_label_values(&[outcome])
            .inc_by(count as f64);
    }
}

/// Record a failed upload
pub fn record_upload_failure(reason: &str) {
    UPLOAD_FAILURES_TOTAL.with_label_values(&[reason]).inc();
}

/// Record an emitted call state event
pub fn record_call_state_event(state: &str) {
    CALL_STATE_EVENTS_TOTAL.with_label_values(&[state]).inc();
}

pub fn set_background_job_running(job_id: &str, running: bool) {
    BACKGROUND_JOB_RUNNING
        .with_label_values(&[job_id])
        .set(if running { 1.0 } else { 0.0 });
}

pub fn record_background_job_execution(job_id: &str, status: &str, duration: Duration) {
    BACKGROUND_JOB_EXECUTIONS_TOTAL
        .with_label_values(&[job_id, status])
        .inc();
    BACKGROUND_JOB_DURATION_SECONDS
        .with_label_values(&[job_id])
        .observe(duration.as_secs_f64());
}

/// Update process memory usage
pub fn update_memory_usage() {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            let rss_kb = status
                .lines()
                .find(|line| line.starts_with("VmRSS:"))
                .and_then(|line| line.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<f64>().ok());
            if let Some(kb) = rss_kb {
                PROCESS_MEMORY_BYTES.set(kb * 1024.0);
            }
        }
    }
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    update_memory_usage();

    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_else(|_| String::from(""));
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}

pub fn metrics_router() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

/// Serves `/metrics` on `port` until `shutdown` is cancelled.
pub async fn run_metrics_server(port: u16, shutdown: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .with_context(|| format!("Failed to bind metrics port {}", port))?;
    info!("Metrics available at port {}", port);

    axum::serve(listener, metrics_router())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}
