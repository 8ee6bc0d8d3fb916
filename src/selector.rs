//! Initial-target selection.
//!
//! Decides whether a request is first sent to the cache tier or straight to
//! the origin, from the cluster policy in the current directory snapshot.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::directory::{ClusterPolicy, DirectorySnapshot};

/// Where an attempt is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    /// The cache tier.
    Bolt,
    /// The cloud object store.
    Origin,
}

impl Target {
    /// The target a failover attempt goes to.
    pub fn alternate(self) -> Target {
        match self {
            Target::Bolt => Target::Origin,
            Target::Origin => Target::Bolt,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Target::Bolt => "bolt",
            Target::Origin => "origin",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How traffic is divided between the cache tier and the origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrafficSplit {
    /// Split on a checksum of bucket and key, so a given object always
    /// starts at the same target. Reads observe writes made through the
    /// same path.
    #[default]
    ObjectKeyHash,
    /// Split on a fresh random draw per request.
    Random,
}

impl std::str::FromStr for TrafficSplit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "objectkeyhash" => Ok(TrafficSplit::ObjectKeyHash),
            "random" => Ok(TrafficSplit::Random),
            other => Err(format!(
                "unknown traffic split {other:?}, expected objectkeyhash or random"
            )),
        }
    }
}

pub const REASON_BACKWARDS_COMPATIBILITY: &str = "backwards compatibility";
pub const REASON_CLUSTER_UNHEALTHY: &str = "cluster unhealthy";
pub const REASON_TRAFFIC_SPLITTING: &str = "traffic splitting";

/// Choose the first target for a request with the given routing hash.
pub fn select_initial_target(
    snapshot: &DirectorySnapshot,
    strategy: TrafficSplit,
    routing_hash: u32,
) -> (Target, &'static str) {
    match snapshot.policy {
        ClusterPolicy::Legacy => (Target::Bolt, REASON_BACKWARDS_COMPATIBILITY),
        ClusterPolicy::Current {
            cluster_healthy: false,
            ..
        } => (Target::Origin, REASON_CLUSTER_UNHEALTHY),
        ClusterPolicy::Current {
            traffic_split_percent,
            ..
        } => {
            let draw = match strategy {
                TrafficSplit::ObjectKeyHash => routing_hash % 100,
                TrafficSplit::Random => rand::thread_rng().gen_range(0..100),
            };
            if draw < u32::from(traffic_split_percent) {
                (Target::Bolt, REASON_TRAFFIC_SPLITTING)
            } else {
                (Target::Origin, REASON_TRAFFIC_SPLITTING)
            }
        }
    }
}
