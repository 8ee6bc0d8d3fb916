//! Sidekick -- S3 accelerator proxy.
//!
//! Loads configuration, resolves placement, loads the first endpoint
//! directory and serves until SIGTERM/SIGINT. Shutdown stops the listener,
//! cancels in-flight requests and the background refreshers.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use sidekick::config::{load_config, Config};
use sidekick::placement::Placement;
use sidekick::router::BoltRouter;
use sidekick::selector::TrafficSplit;

/// Command-line arguments for the sidekick proxy.
#[derive(Parser, Debug)]
#[command(name = "sidekick", version, about = "S3 accelerator proxy")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the bind address (host:port).
    #[arg(short, long)]
    bind: Option<String>,

    /// Run against a single local cache-tier endpoint.
    #[arg(long)]
    local: bool,

    /// Cache-tier endpoint used in local mode.
    #[arg(long)]
    bolt_endpoint_override: Option<String>,

    /// Let the cache tier read through to the origin on a miss.
    #[arg(long)]
    passthrough: bool,

    /// Fail over to the other target on errors.
    #[arg(long)]
    failover: bool,

    /// Do not retry a 404 against the other target.
    #[arg(long)]
    no_fallback_404: bool,

    /// Traffic split strategy: objectkeyhash or random.
    #[arg(long)]
    crunch_traffic_split: Option<TrafficSplit>,

    /// Log at debug level.
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Flags override file and environment values.
    fn apply(&self, config: &mut Config) -> anyhow::Result<()> {
        if let Some(bind) = &self.bind {
            let (host, port) = bind
                .rsplit_once(':')
                .filter(|(host, _)| !host.is_empty())
                .with_context(|| format!("--bind must be host:port, got {bind:?}"))?;
            config.server.host = host.to_string();
            config.server.port = port
                .parse()
                .with_context(|| format!("invalid port in --bind {bind:?}"))?;
        }
        config.router.local |= self.local;
        config.router.passthrough |= self.passthrough;
        config.router.failover |= self.failover;
        config.router.no_fallback_404 |= self.no_fallback_404;
        if let Some(endpoint) = &self.bolt_endpoint_override {
            config.router.bolt_endpoint_override = endpoint.clone();
        }
        if let Some(split) = self.crunch_traffic_split {
            config.router.traffic_split = split;
        }
        if self.verbose {
            config.logging.level = "debug".to_string();
        }
        Ok(())
    }
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    cli.apply(&mut config)?;
    config.validate()?;
    init_tracing(&config);

    if let Some(path) = &cli.config {
        info!("Loaded configuration from {}", path.display());
    }

    if config.observability.metrics {
        sidekick::metrics::init_metrics()?;
        sidekick::metrics::describe_metrics();
        info!("Prometheus metrics initialized");
    }

    let placement = Placement::resolve(&config.bolt, config.router.local).await?;
    let router = Arc::new(BoltRouter::from_config(&config.router, placement)?);

    let shutdown = CancellationToken::new();
    let tasks = router.start(&shutdown).await?;
    info!(
        local = config.router.local,
        failover = config.router.failover,
        no_fallback_404 = config.router.no_fallback_404,
        traffic_split = ?config.router.traffic_split,
        "router started"
    );

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout);
    let state = Arc::new(sidekick::AppState {
        config,
        router,
        shutdown: shutdown.clone(),
    });
    let app = sidekick::server::app(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("could not bind {bind_addr}"))?;
    info!("Sidekick listening on {}", bind_addr);

    let serve_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            serve_shutdown.cancel();
        })
        .await?;

    shutdown.cancel();
    let join = futures::future::join_all(tasks);
    if tokio::time::timeout(shutdown_timeout, join).await.is_err() {
        warn!("background tasks did not stop within {:?}", shutdown_timeout);
    }

    info!("Sidekick shut down");

    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C), then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        },
    }
}
