//! Sidekick library: an S3 accelerator proxy.
//!
//! Requests signed for the cloud object store are re-addressed to a
//! cache-tier endpoint, with a re-signed copy for the origin kept ready as
//! a fallback. This crate provides request transformation and signing,
//! endpoint discovery and liveness, target selection, and the failover
//! engine, plus the HTTP surface that fronts them.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

pub mod analytics;
pub mod atomic;
pub mod auth;
pub mod config;
pub mod credentials;
pub mod directory;
pub mod engine;
pub mod errors;
pub mod metrics;
pub mod placement;
pub mod request;
pub mod router;
pub mod selector;
pub mod server;
pub mod source_bucket;
pub mod transport;
pub mod xml;

use crate::config::Config;
use crate::router::BoltRouter;

/// Shared application state passed to all handlers via `axum::extract::State`.
pub struct AppState {
    /// Effective configuration.
    pub config: Config,
    /// Request router and failover engine.
    pub router: Arc<BoltRouter>,
    /// Cancelled on shutdown; per-request tokens are children of it.
    pub shutdown: CancellationToken,
}
