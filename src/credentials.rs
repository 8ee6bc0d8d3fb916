//! Per-region cloud credential cache.
//!
//! Credentials are fetched lazily the first time a region is seen and kept
//! for the life of the process. Temporary credentials (those with an expiry)
//! are re-fetched by [`CredentialCache::refresh_all`], which the router runs
//! on a fixed interval.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::SystemTime;

use anyhow::Context;
use aws_credential_types::provider::ProvideCredentials;
use tracing::{debug, info, warn};

/// Cloud credentials for one region.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub expires_at: Option<SystemTime>,
    /// Whether the identity provider issued these with an expiry.
    pub can_expire: bool,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"** redacted **")
            .field("session_token", &self.session_token.as_ref().map(|_| "** redacted **"))
            .field("expires_at", &self.expires_at)
            .field("can_expire", &self.can_expire)
            .finish()
    }
}

/// Source of fresh credentials for a region.
pub trait CredentialProvider: Send + Sync + 'static {
    /// Fetch credentials scoped to `region`.
    fn fetch(
        &self,
        region: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Credential>> + Send + '_>>;
}

/// Resolves credentials through the standard AWS provider chain
/// (environment, shared profile, web identity, instance role).
#[derive(Debug, Default)]
pub struct AwsCredentialProvider;

impl CredentialProvider for AwsCredentialProvider {
    fn fetch(
        &self,
        region: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Credential>> + Send + '_>> {
        let region = region.to_string();
        Box::pin(async move {
            let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
                .region(aws_config::Region::new(region.clone()))
                .load()
                .await;

            let provider = config
                .credentials_provider()
                .context("no credentials provider configured")?;
            let creds = provider
                .provide_credentials()
                .await
                .with_context(|| format!("could not retrieve aws credentials for {region}"))?;

            Ok(Credential {
                access_key_id: creds.access_key_id().to_string(),
                secret_access_key: creds.secret_access_key().to_string(),
                session_token: creds.session_token().map(str::to_string),
                expires_at: creds.expiry(),
                can_expire: creds.expiry().is_some(),
            })
        })
    }
}

/// Region-keyed credential cache.
pub struct CredentialCache {
    provider: Arc<dyn CredentialProvider>,
    entries: RwLock<HashMap<String, Arc<Credential>>>,
}

impl CredentialCache {
    pub fn new(provider: Arc<dyn CredentialProvider>) -> Self {
        Self {
            provider,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Return the cached credential for `region`, fetching it on first use.
    ///
    /// A failed fetch is returned to the caller and never cached.
    pub async fn get(&self, region: &str) -> anyhow::Result<Arc<Credential>> {
        if let Some(cred) = self.cached(region) {
            return Ok(cred);
        }

        debug!(region, "fetching credentials");
        let cred = Arc::new(self.provider.fetch(region).await?);
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(region.to_string(), cred.clone());
        Ok(cred)
    }

    /// Re-fetch every cached credential that can expire.
    ///
    /// Regions are refreshed independently; a failure leaves that region's
    /// previous credential in place and is reported in the combined error.
    pub async fn refresh_all(&self) -> anyhow::Result<()> {
        let expirable: Vec<String> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, cred)| cred.can_expire)
            .map(|(region, _)| region.clone())
            .collect();

        let mut failures = Vec::new();
        for region in expirable {
            match self.provider.fetch(&region).await {
                Ok(cred) => {
                    self.entries
                        .write()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(region.clone(), Arc::new(cred));
                    debug!(region = %region, "refreshed credentials");
                }
                Err(e) => {
                    warn!(region = %region, error = %e, "credential refresh failed");
                    failures.push(format!("{region}: {e:#}"));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("credential refresh failed for {}", failures.join("; "))
        }
    }

    /// Number of regions currently cached.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cached(&self, region: &str) -> Option<Arc<Credential>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(region)
            .cloned()
    }
}

impl fmt::Debug for CredentialCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialCache")
            .field("regions", &self.len())
            .finish()
    }
}

/// Log the outcome of a background refresh pass.
pub(crate) fn log_refresh_outcome(result: &anyhow::Result<()>) {
    match result {
        Ok(()) => info!("credential refresh complete"),
        Err(e) => tracing::error!(error = %e, "credential refresh incomplete"),
    }
}
