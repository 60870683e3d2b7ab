use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Global configuration for the gate
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Listener configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// The single upstream that receives allowed traffic
    pub upstream: UpstreamConfig,

    /// Policy source and blocked-response settings
    pub maintenance: MaintenanceConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Bind address (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind: String,

    /// HTTP port (default: 8080)
    #[serde(default = "default_listen_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind_address(),
            port: default_listen_port(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamConfig {
    /// Upstream authority, e.g. "127.0.0.1:3000"
    pub address: String,

    /// Max time to wait for the upstream response (default: 30)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Maximum idle connections kept to the upstream (default: 10)
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,

    /// Idle connection timeout in seconds (default: 90)
    #[serde(default = "default_pool_idle_timeout")]
    pub pool_idle_timeout_secs: u64,
}

impl UpstreamConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Where the negotiated representation of a blocked response comes from
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub enum Strategy {
    /// Negotiate from the inbound Accept header; the upstream is never called
    #[default]
    #[serde(rename = "short-circuit", alias = "short_circuit")]
    ShortCircuit,
    /// Call the upstream, discard its body and negotiate from its Content-Type
    #[serde(rename = "intercept")]
    Intercept,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MaintenanceConfig {
    /// URL returning the JSON policy list
    pub inform_url: String,

    /// Seconds between refreshes (default: 5)
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,

    /// Timeout for a single refresh request in seconds (default: 5)
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Base directory for relative template references
    pub template_dir: Option<PathBuf>,

    #[serde(default)]
    pub strategy: Strategy,

    /// Max time spent discarding an intercepted upstream body in milliseconds (default: 500)
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_ms: u64,

    /// Heading used when a policy does not carry one
    #[serde(default = "default_heading")]
    pub default_heading: String,

    /// Message used when a policy does not carry one
    #[serde(default = "default_message")]
    pub default_message: String,
}

impl MaintenanceConfig {
    /// Minimal config pointing at `inform_url`, everything else defaulted
    pub fn new(inform_url: impl Into<String>) -> Self {
        Self {
            inform_url: inform_url.into(),
            refresh_interval_secs: default_refresh_interval(),
            fetch_timeout_secs: default_fetch_timeout(),
            template_dir: None,
            strategy: Strategy::default(),
            drain_timeout_ms: default_drain_timeout(),
            default_heading: default_heading(),
            default_message: default_message(),
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    30
}

fn default_pool_max_idle_per_host() -> usize {
    10
}

fn default_pool_idle_timeout() -> u64 {
    90
}

fn default_refresh_interval() -> u64 {
    5
}

fn default_fetch_timeout() -> u64 {
    5
}

fn default_drain_timeout() -> u64 {
    500
}

fn default_heading() -> String {
    "Down for maintenance".to_string()
}

fn default_message() -> String {
    "We are performing scheduled maintenance and will be back shortly.".to_string()
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.upstream.address.trim().is_empty() {
            anyhow::bail!("upstream.address must not be empty");
        }
        if !self.maintenance.inform_url.starts_with("http://")
            && !self.maintenance.inform_url.starts_with("https://")
        {
            anyhow::bail!(
                "maintenance.inform_url must be an http(s) URL, got '{}'",
                self.maintenance.inform_url
            );
        }
        if self.maintenance.refresh_interval_secs == 0 {
            anyhow::bail!("maintenance.refresh_interval_secs must be greater than 0");
        }
        if self.maintenance.fetch_timeout_secs == 0 {
            anyhow::bail!("maintenance.fetch_timeout_secs must be greater than 0");
        }
        Ok(())
    }
}
