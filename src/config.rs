//! Configuration loading and types for the sidekick proxy.
//!
//! Configuration is read from an optional YAML file and deserialized into
//! the [`Config`] struct. Every leaf can then be overridden from the
//! environment as `SIDEKICK_<SECTION>_<FIELD>`; command-line flags are
//! applied last by the binary.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::path::Path;

use crate::selector::TrafficSplit;

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "SIDEKICK";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Routing and failover behaviour.
    #[serde(default)]
    pub router: RouterConfig,

    /// Placement of this process relative to the cache tier.
    #[serde(default)]
    pub bolt: BoltConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Bind host address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

/// Routing and failover configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouterConfig {
    /// Run against a single statically configured cache-tier endpoint.
    #[serde(default)]
    pub local: bool,

    /// Let the cache tier serve reads straight from the origin on a miss.
    #[serde(default)]
    pub passthrough: bool,

    /// Fail over to the other target on errors and non-2xx responses.
    #[serde(default)]
    pub failover: bool,

    /// Do not retry a 404 against the other target.
    #[serde(default)]
    pub no_fallback_404: bool,

    /// `objectkeyhash` or `random`.
    #[serde(default)]
    pub traffic_split: TrafficSplit,

    /// Cache-tier endpoint used in local mode, `host[:port]`.
    #[serde(default)]
    pub bolt_endpoint_override: String,

    #[serde(default = "default_directory_refresh_interval")]
    pub directory_refresh_interval_secs: u64,

    #[serde(default = "default_credential_refresh_interval")]
    pub credential_refresh_interval_secs: u64,

    /// Timeout for each outbound attempt.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Region assumed when a request carries no signing region. Empty
    /// rejects such requests.
    #[serde(default)]
    pub default_region: String,

    /// Skip certificate verification towards the cache tier. Its
    /// certificates are issued for the cache-tier hostname, not for the
    /// endpoint addresses requests are sent to.
    #[serde(default = "default_true")]
    pub insecure_bolt_tls: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            local: false,
            passthrough: false,
            failover: false,
            no_fallback_404: false,
            traffic_split: TrafficSplit::default(),
            bolt_endpoint_override: String::new(),
            directory_refresh_interval_secs: default_directory_refresh_interval(),
            credential_refresh_interval_secs: default_credential_refresh_interval(),
            request_timeout_secs: default_request_timeout(),
            default_region: String::new(),
            insecure_bolt_tls: true,
        }
    }
}

/// Placement configuration. Empty fields fall back to the deployment
/// environment and instance metadata.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BoltConfig {
    #[serde(default)]
    pub region: String,

    #[serde(default)]
    pub zone_id: String,

    #[serde(default)]
    pub custom_domain: String,

    /// Explicit directory-service URL.
    #[serde(default)]
    pub directory_url: String,

    #[serde(default)]
    pub user_agent_prefix: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection and the `/metrics` endpoint.
    #[serde(default = "default_true")]
    pub metrics: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { metrics: true }
    }
}

impl Config {
    /// Reject combinations the router cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.router.local && self.router.bolt_endpoint_override.is_empty() {
            anyhow::bail!("router.local requires router.bolt_endpoint_override");
        }
        if self.router.directory_refresh_interval_secs == 0 {
            anyhow::bail!("router.directory_refresh_interval_secs must be positive");
        }
        if self.router.credential_refresh_interval_secs == 0 {
            anyhow::bail!("router.credential_refresh_interval_secs must be positive");
        }
        if self.router.request_timeout_secs == 0 {
            anyhow::bail!("router.request_timeout_secs must be positive");
        }
        match self.logging.format.as_str() {
            "text" | "json" => Ok(()),
            other => anyhow::bail!("logging.format must be text or json, got {other:?}"),
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    7075
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_directory_refresh_interval() -> u64 {
    10
}

fn default_credential_refresh_interval() -> u64 {
    1800
}

fn default_request_timeout() -> u64 {
    90
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load configuration from an optional YAML file at `path`, applying
/// environment overrides from the process environment.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let contents = match path {
        Some(path) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("could not read {}", path.display()))?,
        ),
        None => None,
    };
    parse_config(contents.as_deref(), |k| std::env::var(k).ok())
}

/// Parse YAML `contents` (or the defaults when `None`) and apply overrides
/// found through `env`.
pub fn parse_config<F>(contents: Option<&str>, env: F) -> anyhow::Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let mut doc = match contents {
        Some(text) if !text.trim().is_empty() => {
            serde_yaml::from_str::<Value>(text).context("invalid YAML configuration")?
        }
        _ => Value::Mapping(Mapping::new()),
    };
    if !doc.is_mapping() {
        anyhow::bail!("configuration must be a YAML mapping");
    }

    // The default configuration enumerates every overridable leaf.
    let template = serde_yaml::to_value(Config::default())?;
    let mut path = Vec::new();
    apply_env_overrides(&template, &mut path, &mut doc, &env)?;

    let config: Config = serde_yaml::from_value(doc).context("invalid configuration")?;
    Ok(config)
}

fn apply_env_overrides<F>(
    template: &Value,
    path: &mut Vec<String>,
    doc: &mut Value,
    env: &F,
) -> anyhow::Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Value::Mapping(fields) = template {
        for (key, child) in fields {
            let Some(key) = key.as_str() else { continue };
            path.push(key.to_string());
            apply_env_overrides(child, path, doc, env)?;
            path.pop();
        }
        return Ok(());
    }

    let var = env_var_name(path);
    let Some(raw) = env(&var) else {
        return Ok(());
    };
    let value: Value =
        serde_yaml::from_str(&raw).with_context(|| format!("invalid value in {var}"))?;
    set_path(doc, path, value);
    Ok(())
}

/// `["router", "no_fallback_404"]` -> `SIDEKICK_ROUTER_NO_FALLBACK_404`.
fn env_var_name(path: &[String]) -> String {
    let mut name = ENV_PREFIX.to_string();
    for part in path {
        name.push('_');
        name.push_str(&part.to_ascii_uppercase());
    }
    name
}

fn set_path(doc: &mut Value, path: &[String], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut node = doc;
    for part in parents {
        if !node.is_mapping() {
            *node = Value::Mapping(Mapping::new());
        }
        let Value::Mapping(map) = node else { return };
        node = map
            .entry(Value::String(part.clone()))
            .or_insert_with(|| Value::Mapping(Mapping::new()));
    }
    if !node.is_mapping() {
        *node = Value::Mapping(Mapping::new());
    }
    if let Value::Mapping(map) = node {
        map.insert(Value::String(last.clone()), value);
    }
}
