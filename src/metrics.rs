//! Prometheus metrics: refresh requests by outcome, upstream errors, upstream
//! request duration. When global.metrics.enabled, GET /metrics on the main
//! server exposes text format.

use once_cell::sync::OnceCell;
use prometheus::{Encoder, IntCounterVec, Opts, TextEncoder};

static METRICS: OnceCell<MetricsInner> = OnceCell::new();

struct MetricsInner {
    refresh_requests_total: IntCounterVec,
    upstream_errors_total: IntCounterVec,
    upstream_request_duration_seconds: prometheus::HistogramVec,
}

/// Initialize metrics and register with the default registry. Call once when metrics are enabled.
pub fn init() -> Result<(), prometheus::Error> {
    let refresh_requests_total = IntCounterVec::new(
        Opts::new(
            "idun_refresh_requests_total",
            "Refresh requests by outcome: ok, missing_cookie, refresh_failed",
        ),
        &["outcome"],
    )?;
    let upstream_errors_total = IntCounterVec::new(
        Opts::new(
            "idun_upstream_errors_total",
            "Upstream call failures by endpoint: refresh, profile, games",
        ),
        &["upstream"],
    )?;
    let upstream_request_duration_seconds = prometheus::HistogramVec::new(
        prometheus::HistogramOpts::new(
            "idun_upstream_request_duration_seconds",
            "Upstream request duration in seconds by endpoint",
        )
        .buckets(prometheus::exponential_buckets(0.05, 2.0, 10).unwrap()),
        &["upstream"],
    )?;

    prometheus::register(Box::new(refresh_requests_total.clone()))?;
    prometheus::register(Box::new(upstream_errors_total.clone()))?;
    prometheus::register(Box::new(upstream_request_duration_seconds.clone()))?;

    let _ = METRICS.set(MetricsInner {
        refresh_requests_total,
        upstream_errors_total,
        upstream_request_duration_seconds,
    });
    Ok(())
}

/// Record one inbound refresh request. outcome: "ok", "missing_cookie", "refresh_failed".
pub fn record_refresh_request(outcome: &str) {
    if let Some(m) = METRICS.get() {
        m.refresh_requests_total
            .with_label_values(&[outcome])
            .inc();
    }
}

/// Record one upstream call failure. upstream: "refresh", "profile", "games".
pub fn record_upstream_error(upstream: &str) {
    if let Some(m) = METRICS.get() {
        m.upstream_errors_total.with_label_values(&[upstream]).inc();
    }
}

/// Record one upstream call duration.
pub fn record_upstream_duration(upstream: &str, duration_secs: f64) {
    if let Some(m) = METRICS.get() {
        m.upstream_request_duration_seconds
            .with_label_values(&[upstream])
            .observe(duration_secs);
    }
}

/// Encode all metrics in Prometheus text format. Returns empty string if metrics not initialized.
pub fn encode() -> String {
    if METRICS.get().is_none() {
        return String::new();
    }
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if encoder.encode(&families, &mut buffer).is_ok() {
        String::from_utf8_lossy(&buffer).into_owned()
    } else {
        String::new()
    }
}
