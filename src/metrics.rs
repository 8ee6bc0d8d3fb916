//! Prometheus metrics for the sidekick proxy.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`,
//! defines metric name constants, provides a Tower-compatible middleware for
//! HTTP RED metrics, and exposes the `/metrics` endpoint handler.

use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::{Mutex, OnceLock, PoisonError};
use std::time::Instant;

// -- Metric name constants ----------------------------------------------------

/// Total HTTP requests (counter). Labels: method, path, status.
pub const HTTP_REQUESTS_TOTAL: &str = "sidekick_http_requests_total";

/// HTTP request duration in seconds (histogram). Labels: method, path.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "sidekick_http_request_duration_seconds";

/// Outbound attempts (counter). Labels: target, outcome.
pub const ATTEMPTS_TOTAL: &str = "sidekick_attempts_total";

/// Failovers from one target to the other (counter). Labels: from, to.
pub const FAILOVERS_TOTAL: &str = "sidekick_failovers_total";

/// Cache-tier endpoints marked offline (counter).
pub const ENDPOINTS_MARKED_OFFLINE_TOTAL: &str = "sidekick_endpoints_marked_offline_total";

/// Cache-tier endpoints currently offline (gauge).
pub const OFFLINE_ENDPOINTS: &str = "sidekick_offline_endpoints";

/// Directory refreshes (counter). Labels: outcome.
pub const DIRECTORY_REFRESH_TOTAL: &str = "sidekick_directory_refresh_total";

/// Credential refresh passes (counter). Labels: outcome.
pub const CREDENTIAL_REFRESH_TOTAL: &str = "sidekick_credential_refresh_total";

/// Total bytes received in request bodies (counter).
pub const BYTES_RECEIVED_TOTAL: &str = "sidekick_bytes_received_total";

// -- Global recorder installation ---------------------------------------------

/// Singleton handle to the Prometheus recorder.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Serializes recorder installation.
static INSTALL_LOCK: Mutex<()> = Mutex::new(());

/// Install the global Prometheus metrics recorder. Idempotent -- safe to call
/// multiple times (e.g. in tests).
pub fn init_metrics() -> anyhow::Result<&'static PrometheusHandle> {
    let _guard = INSTALL_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle);
    }
    let handle = PrometheusBuilder::new().install_recorder()?;
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle))
}

/// Register metric descriptions with the global recorder. Call once after
/// `init_metrics()`.
pub fn describe_metrics() {
    describe_counter!(HTTP_REQUESTS_TOTAL, "Total HTTP requests");
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_counter!(ATTEMPTS_TOTAL, "Outbound attempts by target and outcome");
    describe_counter!(FAILOVERS_TOTAL, "Failovers between cache tier and origin");
    describe_counter!(
        ENDPOINTS_MARKED_OFFLINE_TOTAL,
        "Cache-tier endpoints marked offline"
    );
    describe_gauge!(OFFLINE_ENDPOINTS, "Cache-tier endpoints currently offline");
    describe_counter!(DIRECTORY_REFRESH_TOTAL, "Endpoint directory refreshes");
    describe_counter!(CREDENTIAL_REFRESH_TOTAL, "Credential refresh passes");
    describe_counter!(BYTES_RECEIVED_TOTAL, "Total bytes received (request bodies)");
}

// -- Metrics middleware -------------------------------------------------------

/// Axum middleware that records HTTP RED metrics for every request.
///
/// Excludes `/metrics` from self-instrumentation to avoid feedback loops.
pub async fn metrics_middleware(
    req: Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Response {
    if req.uri().path() == "/metrics" {
        return next.run(req).await;
    }

    let method = req.method().to_string();
    let path = normalize_path(req.uri().path());

    let start = Instant::now();
    let response = next.run(req).await;
    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path.clone(), "status" => status).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path).record(duration);

    response
}

// -- Path normalization -------------------------------------------------------

/// Normalize an actual request path to a route template for metric labels.
///
/// Proxied paths carry bucket and key names, which would make labels
/// unbounded.
///
/// Examples:
/// - `/health` -> `/health`
/// - `/my-bucket` -> `/{bucket}`
/// - `/my-bucket/path/to/key` -> `/{bucket}/{key}`
/// - `/` -> `/`
fn normalize_path(path: &str) -> String {
    match path {
        "/" | "/health" | "/metrics" => path.to_string(),
        _ => {
            let trimmed = path.trim_start_matches('/');
            if trimmed.is_empty() {
                return "/".to_string();
            }
            match trimmed.find('/') {
                None => "/{bucket}".to_string(),
                Some(_) => "/{bucket}/{key}".to_string(),
            }
        }
    }
}

// -- Metrics endpoint handler -------------------------------------------------

/// `GET /metrics` -- Render Prometheus exposition format text.
pub async fn metrics_handler() -> Response {
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response(),
    }
}

// -- Tests --------------------------------------------------------------------
