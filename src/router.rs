//! The router: owns the endpoint directory, the credential cache and the
//! engine, and keeps the first two fresh in the background.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use chrono::Utc;
use metrics::{counter, gauge};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RouterConfig;
use crate::credentials::{
    log_refresh_outcome, AwsCredentialProvider, CredentialCache, CredentialProvider,
};
use crate::directory::{ClusterPolicy, DirectorySource, EndpointDirectory};
use crate::engine::{Engine, ExecutionOutcome, FailoverPolicy};
use crate::errors::RouterError;
use crate::metrics::{CREDENTIAL_REFRESH_TOTAL, DIRECTORY_REFRESH_TOTAL, OFFLINE_ENDPOINTS};
use crate::placement::Placement;
use crate::request::{BoltRequest, TransformOptions};
use crate::selector::{select_initial_target, Target};
use crate::source_bucket::SourceBucket;
use crate::transport::{HttpTransport, Transport};

/// Reason recorded when target selection panicked.
pub const REASON_SELECTION_PANIC: &str = "target selection panicked";

/// Target used when no initial target could be chosen.
const MANUAL_FAILOVER_TARGET: Target = Target::Origin;

const DIRECTORY_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

pub struct BoltRouter {
    config: RouterConfig,
    placement: Placement,
    directory: Arc<EndpointDirectory>,
    credentials: Arc<CredentialCache>,
    engine: Engine,
    source: DirectorySource,
    transform: TransformOptions,
}

impl BoltRouter {
    /// Build a router with the production transport, credential chain and
    /// directory source.
    pub fn from_config(config: &RouterConfig, placement: Placement) -> anyhow::Result<Self> {
        let transport = HttpTransport::new(
            Duration::from_secs(config.request_timeout_secs),
            config.insecure_bolt_tls,
        )?;
        let source = if config.local {
            DirectorySource::Local {
                endpoint: config.bolt_endpoint_override.clone(),
            }
        } else {
            let client = reqwest::Client::builder()
                .timeout(DIRECTORY_FETCH_TIMEOUT)
                .build()
                .context("could not build directory http client")?;
            DirectorySource::Remote {
                url: placement.directory_url(),
                client,
            }
        };
        Ok(Self::new(
            config.clone(),
            placement,
            source,
            Arc::new(AwsCredentialProvider),
            Arc::new(transport),
        ))
    }

    pub fn new(
        config: RouterConfig,
        placement: Placement,
        source: DirectorySource,
        provider: Arc<dyn CredentialProvider>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let directory = Arc::new(EndpointDirectory::new());
        let credentials = Arc::new(CredentialCache::new(provider));
        let policy = FailoverPolicy {
            failover: config.failover,
            no_fallback_404: config.no_fallback_404,
        };
        let engine = Engine::new(transport, credentials.clone(), directory.clone(), policy);
        let transform = TransformOptions {
            bolt_hostname: placement.bolt_hostname(),
            user_agent_prefix: placement.user_agent_prefix.clone(),
            zone_id: placement.zone_id.clone(),
            passthrough: config.passthrough,
            bolt_scheme: if config.local { "http" } else { "https" },
        };
        Self {
            config,
            placement,
            directory,
            credentials,
            engine,
            source,
            transform,
        }
    }

    pub fn directory(&self) -> &EndpointDirectory {
        &self.directory
    }

    /// Whether the cache tier reports its cleaner as running. `None` until
    /// a directory with a cluster policy has been seen.
    pub fn cleaner_status(&self) -> Option<bool> {
        match self.directory.snapshot().policy {
            ClusterPolicy::Current { cleaner_on, .. } => Some(cleaner_on),
            ClusterPolicy::Legacy => None,
        }
    }

    /// Fetch and publish a new directory snapshot.
    pub async fn refresh_directory(&self) -> Result<(), RouterError> {
        match self.source.fetch().await {
            Ok(snapshot) => {
                debug!(policy = ?snapshot.policy, "publishing endpoint directory");
                self.directory.replace(snapshot);
                gauge!(OFFLINE_ENDPOINTS).set(0.0);
                counter!(DIRECTORY_REFRESH_TOTAL, "outcome" => "success").increment(1);
                Ok(())
            }
            Err(e) => {
                counter!(DIRECTORY_REFRESH_TOTAL, "outcome" => "error").increment(1);
                Err(e)
            }
        }
    }

    /// Re-fetch every expirable cached credential.
    pub async fn refresh_credentials(&self) -> anyhow::Result<()> {
        let result = self.credentials.refresh_all().await;
        let outcome = if result.is_ok() { "success" } else { "error" };
        counter!(CREDENTIAL_REFRESH_TOTAL, "outcome" => outcome).increment(1);
        result
    }

    /// Load the first directory and start the background refreshers.
    ///
    /// Fails when the first directory cannot be loaded.
    pub async fn start(self: &Arc<Self>, shutdown: &CancellationToken) -> anyhow::Result<Vec<JoinHandle<()>>> {
        self.refresh_directory()
            .await
            .context("initial endpoint directory refresh failed")?;
        info!(
            local = self.config.local,
            cleaner_on = ?self.cleaner_status(),
            "endpoint directory loaded"
        );

        log_refresh_outcome(&self.refresh_credentials().await);

        let directory_task = {
            let router = self.clone();
            let shutdown = shutdown.clone();
            let every = Duration::from_secs(self.config.directory_refresh_interval_secs);
            tokio::spawn(async move {
                router.directory_refresh_loop(every, shutdown).await;
            })
        };
        let credential_task = {
            let router = self.clone();
            let shutdown = shutdown.clone();
            let every = Duration::from_secs(self.config.credential_refresh_interval_secs);
            tokio::spawn(async move {
                router.credential_refresh_loop(every, shutdown).await;
            })
        };
        Ok(vec![directory_task, credential_task])
    }

    async fn directory_refresh_loop(&self, every: Duration, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; startup already refreshed.
        interval.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.refresh_directory().await {
                        error!(error = %e, "endpoint directory refresh failed");
                    }
                }
            }
        }
        debug!("directory refresher stopped");
    }

    async fn credential_refresh_loop(&self, every: Duration, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => log_refresh_outcome(&self.refresh_credentials().await),
            }
        }
        debug!("credential refresher stopped");
    }

    /// Turn an inbound request into its cache-tier and origin forms.
    pub async fn transform(&self, inbound: &http::Request<Bytes>) -> Result<BoltRequest, RouterError> {
        let default_region = Some(self.config.default_region.as_str()).filter(|r| !r.is_empty());
        let source = SourceBucket::extract(inbound, default_region)?;
        debug!(bucket = %source.bucket, region = %source.region, style = %source.style, "extracted source bucket");

        let credential = self
            .credentials
            .get(&source.region)
            .await
            .map_err(|source_err| RouterError::Credentials {
                region: source.region.clone(),
                source: source_err,
            })?;

        let endpoint = self.directory.select_endpoint(inbound.method())?;
        BoltRequest::new(
            inbound,
            source,
            &credential,
            endpoint,
            &self.transform,
            Utc::now(),
        )
    }

    /// Transform and execute one inbound request.
    ///
    /// Errors before an attempt is made are returned directly; everything
    /// after is reported in the outcome.
    pub async fn route(
        &self,
        inbound: &http::Request<Bytes>,
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutcome, RouterError> {
        let req = self.transform(inbound).await?;

        let snapshot = self.directory.snapshot();
        let strategy = self.config.traffic_split;
        let routing_hash = req.routing_hash;
        let selected = catch_unwind(AssertUnwindSafe(|| {
            select_initial_target(&snapshot, strategy, routing_hash)
        }));

        let outcome = match selected {
            Ok((target, reason)) => {
                debug!(%target, reason, "selected initial target");
                self.engine.execute(req, target, reason, cancel).await
            }
            Err(_) => {
                warn!(target = %MANUAL_FAILOVER_TARGET, "target selection panicked, failing over");
                self.engine
                    .execute_failover_only(req, MANUAL_FAILOVER_TARGET, REASON_SELECTION_PANIC, cancel)
                    .await
            }
        };
        Ok(outcome)
    }
}

impl std::fmt::Debug for BoltRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoltRouter")
            .field("config", &self.config)
            .field("placement", &self.placement)
            .field("source", &self.source)
            .finish()
    }
}
