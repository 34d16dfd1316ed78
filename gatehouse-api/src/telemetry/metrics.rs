//! Prometheus Metrics Definitions
//!
//! Counters and histograms for HTTP traffic, backend calls, cache lookups
//! and hook invocations. Exposed on `GET /metrics` for scraping.

use axum::{http::StatusCode, response::IntoResponse};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

use crate::error::{ApiError, ApiResult};

/// HTTP request latency buckets (seconds)
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Backend call latency buckets (seconds)
const BACKEND_LATENCY_BUCKETS: &[f64] =
    &[0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 30.0];

/// Global metrics instance, registered on first use
pub static METRICS: Lazy<ApiResult<GatehouseMetrics>> = Lazy::new(GatehouseMetrics::new);

#[derive(Clone)]
pub struct GatehouseMetrics {
    /// labels: method, path, status
    pub http_requests_total: CounterVec,

    /// labels: method, path
    pub http_request_duration_seconds: HistogramVec,

    /// labels: service, op, status
    pub backend_calls_total: CounterVec,

    /// labels: service, op
    pub backend_call_duration_seconds: HistogramVec,

    /// labels: cache, outcome (hit/miss/coalesced/straggler/bypass)
    pub cache_lookups_total: CounterVec,

    /// labels: phase, mode, status
    pub hook_invocations_total: CounterVec,
}

fn registration_error(name: &str, err: prometheus::Error) -> ApiError {
    ApiError::internal_error(format!("Failed to register {}: {}", name, err))
}

impl GatehouseMetrics {
    /// Create and register all metrics with the default Prometheus registry.
    pub fn new() -> ApiResult<Self> {
        Ok(Self {
            http_requests_total: register_counter_vec!(
                "gatehouse_http_requests_total",
                "Total number of HTTP requests",
                &["method", "path", "status"]
            )
            .map_err(|e| registration_error("http_requests_total", e))?,

            http_request_duration_seconds: register_histogram_vec!(
                "gatehouse_http_request_duration_seconds",
                "HTTP request duration in seconds",
                &["method", "path"],
                HTTP_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| registration_error("http_request_duration_seconds", e))?,

            backend_calls_total: register_counter_vec!(
                "gatehouse_backend_calls_total",
                "Total number of backend RPCs",
                &["service", "op", "status"]
            )
            .map_err(|e| registration_error("backend_calls_total", e))?,

            backend_call_duration_seconds: register_histogram_vec!(
                "gatehouse_backend_call_duration_seconds",
                "Backend RPC duration in seconds",
                &["service", "op"],
                BACKEND_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| registration_error("backend_call_duration_seconds", e))?,

            cache_lookups_total: register_counter_vec!(
                "gatehouse_cache_lookups_total",
                "Cache lookups by outcome",
                &["cache", "outcome"]
            )
            .map_err(|e| registration_error("cache_lookups_total", e))?,

            hook_invocations_total: register_counter_vec!(
                "gatehouse_hook_invocations_total",
                "Custom event hook invocations",
                &["phase", "mode", "status"]
            )
            .map_err(|e| registration_error("hook_invocations_total", e))?,
        })
    }

    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, &status_str])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    pub fn record_backend_call(&self, service: &str, op: &str, status: &str, duration_secs: f64) {
        self.backend_calls_total
            .with_label_values(&[service, op, status])
            .inc();
        self.backend_call_duration_seconds
            .with_label_values(&[service, op])
            .observe(duration_secs);
    }

    pub fn record_cache_lookup(&self, cache: &str, outcome: &str) {
        self.cache_lookups_total
            .with_label_values(&[cache, outcome])
            .inc();
    }

    pub fn record_hook(&self, phase: &str, mode: &str, success: bool) {
        let status = if success { "success" } else { "failure" };
        self.hook_invocations_total
            .with_label_values(&[phase, mode, status])
            .inc();
    }
}

/// Run `f` against the global metrics, if they registered.
pub fn with_metrics(f: impl FnOnce(&GatehouseMetrics)) {
    if let Ok(metrics) = METRICS.as_ref() {
        f(metrics);
    }
}

/// Handler for GET /metrics endpoint.
#[utoipa::path(
    get,
    path = "/metrics",
    tag = "Observability",
    responses(
        (status = 200, description = "Prometheus metrics in text format", content_type = "text/plain"),
        (status = 500, description = "Failed to encode metrics"),
    ),
)]
pub async fn metrics_handler() -> impl IntoResponse {
    // Registration happens lazily; touch the metrics so the families exist.
    Lazy::force(&METRICS);

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}
