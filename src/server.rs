//! Axum router construction.
//!
//! The [`app`] function wires the health and metrics endpoints and sends
//! every other request, whatever its method or path, through the
//! [`BoltRouter`](crate::router::BoltRouter).

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, Request, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use metrics::counter;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::errors::RouterError;
use crate::metrics::{metrics_handler, metrics_middleware, BYTES_RECEIVED_TOTAL};
use crate::request::HOP_BY_HOP;
use crate::AppState;

/// Build the axum [`Router`].
///
/// The returned router is ready to be passed to `axum::serve`.
pub fn app(state: Arc<AppState>) -> Router {
    let mut router = Router::new().route("/health", get(health_check));
    if state.config.observability.metrics {
        router = router.route("/metrics", get(metrics_handler));
    }

    router
        .fallback(proxy)
        .with_state(state.clone())
        // metrics_middleware is inner so TraceLayer spans cover it.
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        // Request bodies are forwarded whole; S3 objects can be large.
        .layer(DefaultBodyLimit::disable())
}

/// `GET /health`
async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "application/json")],
        r#"{"status":"ok"}"#,
    )
}

/// Proxy one S3 request to the cache tier or the origin and relay the
/// response.
async fn proxy(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
) -> Result<Response, RouterError> {
    let (parts, body) = req.into_parts();
    let body = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| RouterError::Internal(anyhow::anyhow!("could not read request body: {e}")))?;
    counter!(BYTES_RECEIVED_TOTAL).increment(body.len() as u64);
    let inbound = Request::from_parts(parts, body);

    let cancel = state.shutdown.child_token();
    let outcome = state.router.route(&inbound, &cancel).await?;
    let resp = outcome.result?;

    let status = resp.status();
    if outcome.is_failover {
        info!(status = status.as_u16(), method = %inbound.method(), path = %inbound.uri().path(), "served by failover");
    }
    if !status.is_success() {
        warn!(status = status.as_u16(), method = %inbound.method(), path = %inbound.uri().path(), "status code is not 2xx");
    } else {
        debug!(status = status.as_u16(), "relaying response");
    }

    Ok(relay(resp))
}

/// Convert an upstream response into an axum response with a streamed body.
fn relay(resp: reqwest::Response) -> Response {
    let status = resp.status();
    let headers = forwardable_headers(resp.headers());
    let mut out = Response::new(Body::from_stream(resp.bytes_stream()));
    *out.status_mut() = status;
    *out.headers_mut() = headers;
    out
}

fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = headers.clone();
    for name in HOP_BY_HOP {
        out.remove(*name);
    }
    out
}
