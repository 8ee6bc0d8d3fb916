//! Endpoint directory and liveness tracking.
//!
//! The directory is the current roster of cache-tier endpoints, grouped by
//! role, plus the cluster policy the control plane publishes alongside it.
//! It is replaced wholesale on every refresh; readers always see one
//! internally consistent [`DirectorySnapshot`].
//!
//! Liveness is tracked separately. An endpoint that fails is marked offline
//! and skipped by [`EndpointDirectory::select_endpoint`] until the next
//! successful refresh clears every mark.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

use http::Method;
use rand::seq::SliceRandom;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::atomic::AtomicVar;
use crate::errors::RouterError;

// ── Roles ───────────────────────────────────────────────────────────

/// Role an endpoint plays in the cache tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointRole {
    MainRead,
    MainWrite,
    FailoverRead,
    FailoverWrite,
}

/// Preference order for read methods.
pub const READ_ORDER: [EndpointRole; 4] = [
    EndpointRole::MainRead,
    EndpointRole::MainWrite,
    EndpointRole::FailoverRead,
    EndpointRole::FailoverWrite,
];

/// Preference order for every other method.
pub const WRITE_ORDER: [EndpointRole; 2] = [EndpointRole::MainWrite, EndpointRole::FailoverWrite];

/// Whether `method` is served from the read roles.
pub fn is_read_method(method: &Method) -> bool {
    *method == Method::GET || *method == Method::HEAD
}

// ── Snapshot ────────────────────────────────────────────────────────

/// Endpoint hosts per role, deduplicated, in the order the control plane
/// listed them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Endpoints {
    pub main_read: Vec<String>,
    pub main_write: Vec<String>,
    pub failover_read: Vec<String>,
    pub failover_write: Vec<String>,
}

impl Endpoints {
    pub fn role(&self, role: EndpointRole) -> &[String] {
        match role {
            EndpointRole::MainRead => &self.main_read,
            EndpointRole::MainWrite => &self.main_write,
            EndpointRole::FailoverRead => &self.failover_read,
            EndpointRole::FailoverWrite => &self.failover_write,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.main_read.is_empty()
            && self.main_write.is_empty()
            && self.failover_read.is_empty()
            && self.failover_write.is_empty()
    }
}

/// Cluster policy attached to a directory payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterPolicy {
    /// The control plane predates health and traffic-split reporting.
    Legacy,
    Current {
        cluster_healthy: bool,
        /// Share of traffic, 0..=100, that starts at the cache tier.
        traffic_split_percent: u8,
        cleaner_on: bool,
    },
}

/// One complete directory as published by the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectorySnapshot {
    pub endpoints: Endpoints,
    pub policy: ClusterPolicy,
}

impl Default for DirectorySnapshot {
    fn default() -> Self {
        Self {
            endpoints: Endpoints::default(),
            policy: ClusterPolicy::Legacy,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DirectoryPayload {
    #[serde(default)]
    main_write_endpoints: Vec<String>,
    #[serde(default)]
    failover_write_endpoints: Vec<String>,
    #[serde(default)]
    main_read_endpoints: Vec<String>,
    #[serde(default)]
    failover_read_endpoints: Vec<String>,
    cluster_healthy: Option<bool>,
    client_behavior_params: Option<BehaviorParams>,
}

#[derive(Debug, Deserialize)]
struct BehaviorParams {
    #[serde(default)]
    cleaner_on: bool,
    crunch_traffic_percent: String,
}

impl DirectorySnapshot {
    /// Decode a directory-service response body.
    ///
    /// A payload missing `cluster_healthy` or `client_behavior_params`
    /// decodes to [`ClusterPolicy::Legacy`]. Fields of the wrong type, or a
    /// traffic percentage outside 0..=100, are errors.
    pub fn decode(body: &[u8]) -> Result<Self, RouterError> {
        let payload: DirectoryPayload = serde_json::from_slice(body)
            .map_err(|e| RouterError::Directory(format!("malformed directory payload: {e}")))?;

        let policy = match (payload.cluster_healthy, payload.client_behavior_params) {
            (Some(cluster_healthy), Some(params)) => {
                let percent: u8 = params.crunch_traffic_percent.trim().parse().map_err(|_| {
                    RouterError::Directory(format!(
                        "crunch_traffic_percent is not an integer: {:?}",
                        params.crunch_traffic_percent
                    ))
                })?;
                if percent > 100 {
                    return Err(RouterError::Directory(format!(
                        "crunch_traffic_percent out of range: {percent}"
                    )));
                }
                ClusterPolicy::Current {
                    cluster_healthy,
                    traffic_split_percent: percent,
                    cleaner_on: params.cleaner_on,
                }
            }
            _ => ClusterPolicy::Legacy,
        };

        Ok(Self {
            endpoints: Endpoints {
                main_read: dedup(payload.main_read_endpoints),
                main_write: dedup(payload.main_write_endpoints),
                failover_read: dedup(payload.failover_read_endpoints),
                failover_write: dedup(payload.failover_write_endpoints),
            },
            policy,
        })
    }

    /// Directory used in local mode: every role is the one override
    /// endpoint and no cluster policy is published.
    pub fn local(endpoint: &str) -> Self {
        let one = vec![endpoint.to_string()];
        Self {
            endpoints: Endpoints {
                main_read: one.clone(),
                main_write: one.clone(),
                failover_read: one.clone(),
                failover_write: one,
            },
            policy: ClusterPolicy::Legacy,
        }
    }
}

fn dedup(hosts: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    hosts
        .into_iter()
        .filter(|h| !h.is_empty() && seen.insert(h.clone()))
        .collect()
}

// ── Liveness ────────────────────────────────────────────────────────

/// Set of endpoints currently considered offline.
#[derive(Debug, Default)]
pub struct Liveness {
    offline: RwLock<HashSet<String>>,
}

impl Liveness {
    /// Mark `endpoint` offline. Returns `true` if it was not already marked.
    pub fn mark_offline(&self, endpoint: &str) -> bool {
        self.offline
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(endpoint.to_string())
    }

    pub fn is_offline(&self, endpoint: &str) -> bool {
        self.offline
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(endpoint)
    }

    pub fn offline_count(&self) -> usize {
        self.offline
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Bring every endpoint back online.
    pub fn reset(&self) {
        self.offline
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

// ── Directory ───────────────────────────────────────────────────────

/// The router's view of the cache tier.
#[derive(Debug, Default)]
pub struct EndpointDirectory {
    snapshot: AtomicVar<DirectorySnapshot>,
    liveness: Liveness,
}

impl EndpointDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current directory snapshot.
    pub fn snapshot(&self) -> Arc<DirectorySnapshot> {
        self.snapshot.get()
    }

    /// Publish a freshly fetched directory and clear every offline mark.
    pub fn replace(&self, snapshot: DirectorySnapshot) {
        self.snapshot.set(snapshot);
        self.liveness.reset();
    }

    pub fn liveness(&self) -> &Liveness {
        &self.liveness
    }

    /// Pick a live endpoint for `method`.
    ///
    /// Roles are tried in preference order; within the first role that has
    /// a live endpoint, one is chosen uniformly at random.
    pub fn select_endpoint(&self, method: &Method) -> Result<String, RouterError> {
        let snapshot = self.snapshot.get();
        let order: &[EndpointRole] = if is_read_method(method) {
            &READ_ORDER
        } else {
            &WRITE_ORDER
        };

        let mut rng = rand::thread_rng();
        for role in order {
            let live: Vec<&String> = snapshot
                .endpoints
                .role(*role)
                .iter()
                .filter(|e| !self.liveness.is_offline(e))
                .collect();
            if let Some(endpoint) = live.choose(&mut rng) {
                debug!(?role, endpoint = %endpoint, "selected endpoint");
                return Ok((*endpoint).clone());
            }
        }

        warn!(%method, "no live endpoints in any role");
        Err(RouterError::NoEndpointsAvailable)
    }
}

// ── Directory service client ────────────────────────────────────────

/// Where directory snapshots come from.
#[derive(Debug, Clone)]
pub enum DirectorySource {
    /// The control-plane directory service.
    Remote { url: String, client: reqwest::Client },
    /// A single statically configured endpoint; nothing is fetched.
    Local { endpoint: String },
}

impl DirectorySource {
    /// Produce the next directory snapshot.
    pub async fn fetch(&self) -> Result<DirectorySnapshot, RouterError> {
        match self {
            DirectorySource::Local { endpoint } => Ok(DirectorySnapshot::local(endpoint)),
            DirectorySource::Remote { url, client } => {
                let resp = client
                    .get(url)
                    .send()
                    .await
                    .map_err(|e| RouterError::Directory(format!("GET {url}: {e}")))?;
                let status = resp.status();
                if !status.is_success() {
                    return Err(RouterError::Directory(format!(
                        "GET {url}: unexpected status {status}"
                    )));
                }
                let body = resp
                    .bytes()
                    .await
                    .map_err(|e| RouterError::Directory(format!("GET {url}: {e}")))?;
                DirectorySnapshot::decode(&body)
            }
        }
    }
}
