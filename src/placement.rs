//! Where this process runs and how it reaches the cache tier.
//!
//! Placement is resolved once at startup from the `bolt` config section,
//! then the deployment environment variables, then the EC2 instance
//! metadata service.

use anyhow::Context;
use tracing::{debug, info, warn};

use crate::config::BoltConfig;

/// Prefix prepended to every forwarded `User-Agent` when none is configured.
pub const DEFAULT_USER_AGENT_PREFIX: &str = "granica-sidekick/";

const IMDS_ZONE_ID_PATH: &str = "/latest/meta-data/placement/availability-zone-id";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Placement {
    pub region: String,
    pub zone_id: String,
    pub custom_domain: String,
    pub user_agent_prefix: String,
    directory_url_override: Option<String>,
}

impl Placement {
    /// Resolve placement from config and the given environment lookup,
    /// without consulting instance metadata.
    pub fn from_config<F>(cfg: &BoltConfig, env: F) -> Placement
    where
        F: Fn(&str) -> Option<String>,
    {
        let pick = |configured: &str, vars: &[&str]| -> String {
            if !configured.is_empty() {
                return configured.to_string();
            }
            vars.iter()
                .find_map(|v| env(v).filter(|s| !s.is_empty()))
                .unwrap_or_default()
        };

        let user_agent_prefix = if !cfg.user_agent_prefix.is_empty() {
            cfg.user_agent_prefix.clone()
        } else {
            match env("USER_AGENT_PREFIX").filter(|s| !s.is_empty()) {
                Some(prefix) => format!("{prefix}/"),
                None => DEFAULT_USER_AGENT_PREFIX.to_string(),
            }
        };

        Placement {
            region: pick(&cfg.region, &["GRANICA_REGION"]),
            zone_id: pick(&cfg.zone_id, &["AWS_ZONE_ID"]),
            custom_domain: pick(
                &cfg.custom_domain,
                &["GRANICA_CUSTOM_DOMAIN", "BOLT_CUSTOM_DOMAIN"],
            ),
            user_agent_prefix,
            directory_url_override: Some(cfg.directory_url.clone()).filter(|u| !u.is_empty()),
        }
    }

    /// Resolve placement, falling back to instance metadata for the region
    /// and availability zone when neither config nor environment set them.
    pub async fn resolve(cfg: &BoltConfig, local: bool) -> anyhow::Result<Placement> {
        let mut placement = Placement::from_config(cfg, |k| std::env::var(k).ok());

        if placement.region.is_empty() && !local {
            debug!("region not configured, asking instance metadata");
            let region = aws_config::imds::region::ImdsRegionProvider::builder()
                .build()
                .region()
                .await
                .context("GRANICA_REGION is not set and instance metadata has no region")?;
            placement.region = region.to_string();

            if placement.zone_id.is_empty() {
                match imds_zone_id().await {
                    Ok(zone) => placement.zone_id = zone,
                    Err(e) => warn!(error = %e, "could not read availability zone id"),
                }
            }
        }

        if !local {
            placement.validate()?;
        }
        info!(
            region = %placement.region,
            zone_id = %placement.zone_id,
            custom_domain = %placement.custom_domain,
            "resolved placement"
        );
        Ok(placement)
    }

    /// Check that the directory service can be addressed.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.region.is_empty() {
            anyhow::bail!("region is not set");
        }
        if self.custom_domain.is_empty() && self.directory_url_override.is_none() {
            anyhow::bail!("GRANICA_CUSTOM_DOMAIN or BOLT_CUSTOM_DOMAIN env variable is not set");
        }
        Ok(())
    }

    /// Host header the cache tier expects: `bolt.<region>.<domain>`.
    pub fn bolt_hostname(&self) -> String {
        format!("bolt.{}.{}", self.region, self.custom_domain)
    }

    /// Directory-service URL, including the availability-zone hint.
    pub fn directory_url(&self) -> String {
        if let Some(url) = &self.directory_url_override {
            return url.clone();
        }
        let mut url = format!(
            "https://quicksilver.{}.{}/services/bolt",
            self.region, self.custom_domain
        );
        if !self.zone_id.is_empty() {
            url.push_str("?az=");
            url.push_str(&self.zone_id);
        }
        url
    }
}

async fn imds_zone_id() -> anyhow::Result<String> {
    let client = aws_config::imds::Client::builder().build();
    let zone = client
        .get(IMDS_ZONE_ID_PATH)
        .await
        .context("instance metadata request failed")?;
    let zone: &str = zone.as_ref();
    Ok(zone.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_from_env() {
        let p = Placement::from_config(
            &BoltConfig::default(),
            env_of(&[
                ("GRANICA_REGION", "us-west-2"),
                ("AWS_ZONE_ID", "usw2-az1"),
                ("GRANICA_CUSTOM_DOMAIN", "example.granica.ai"),
            ]),
        );
        assert_eq!(p.region, "us-west-2");
        assert_eq!(p.bolt_hostname(), "bolt.us-west-2.example.granica.ai");
        assert_eq!(
            p.directory_url(),
            "https://quicksilver.us-west-2.example.granica.ai/services/bolt?az=usw2-az1"
        );
        assert_eq!(p.user_agent_prefix, DEFAULT_USER_AGENT_PREFIX);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_legacy_domain_variable() {
        let p = Placement::from_config(
            &BoltConfig::default(),
            env_of(&[("GRANICA_REGION", "eu-west-1"), ("BOLT_CUSTOM_DOMAIN", "legacy.io")]),
        );
        assert_eq!(p.custom_domain, "legacy.io");
        assert_eq!(
            p.directory_url(),
            "https://quicksilver.eu-west-1.legacy.io/services/bolt"
        );
    }

    #[test]
    fn test_config_wins_over_env() {
        let cfg = BoltConfig {
            region: "ap-south-1".to_string(),
            custom_domain: "cfg.io".to_string(),
            user_agent_prefix: "custom/".to_string(),
            ..Default::default()
        };
        let p = Placement::from_config(
            &cfg,
            env_of(&[("GRANICA_REGION", "us-west-2"), ("USER_AGENT_PREFIX", "env")]),
        );
        assert_eq!(p.region, "ap-south-1");
        assert_eq!(p.custom_domain, "cfg.io");
        assert_eq!(p.user_agent_prefix, "custom/");
    }

    #[test]
    fn test_user_agent_prefix_env_gets_slash() {
        let p = Placement::from_config(&BoltConfig::default(), env_of(&[("USER_AGENT_PREFIX", "acme")]));
        assert_eq!(p.user_agent_prefix, "acme/");
    }

    #[test]
    fn test_directory_url_override() {
        let cfg = BoltConfig {
            region: "us-east-1".to_string(),
            directory_url: "http://127.0.0.1:8080/services/bolt".to_string(),
            ..Default::default()
        };
        let p = Placement::from_config(&cfg, env_of(&[]));
        assert_eq!(p.directory_url(), "http://127.0.0.1:8080/services/bolt");
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_validate_requires_domain() {
        let p = Placement::from_config(&BoltConfig::default(), env_of(&[("GRANICA_REGION", "us-east-1")]));
        assert!(p.validate().is_err());
        let p = Placement::from_config(&BoltConfig::default(), env_of(&[]));
        assert!(p.validate().is_err());
    }
}
