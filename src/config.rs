//! Configuration management
//!
//! Handles loading and validating node pool configuration from TOML files.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::connection::{
    ConnectionManagerConfig, Endpoint, NetworkId, NetworkOptions, ReconnectPolicy, StaticOptions,
};

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub connect: ConnectConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub networks: Vec<NetworkConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format: "json" or "pretty"
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

/// Metrics configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Enable Prometheus endpoint
    #[serde(default)]
    pub enabled: bool,
    /// Prometheus bind address
    #[serde(default = "default_metrics_addr")]
    pub bind_addr: SocketAddr,
    /// JSON status API bind address (disabled when absent)
    #[serde(default)]
    pub api_addr: Option<SocketAddr>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_addr: default_metrics_addr(),
            api_addr: None,
        }
    }
}

/// Connect behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectConfig {
    /// Budget per endpoint attempt in seconds
    #[serde(default = "default_connect_timeout")]
    pub timeout_secs: u64,
    /// Status report interval in seconds (0 = disabled)
    #[serde(default = "default_status_interval")]
    pub status_interval_secs: u64,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_connect_timeout(),
            status_interval_secs: default_status_interval(),
        }
    }
}

/// Reconnect retry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectConfig {
    /// Retries after the first reconnect attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Ignore `max_retries` and keep retrying
    #[serde(default)]
    pub retry_forever: bool,
    /// Delay before the first retry in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,
    /// Delay cap in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    /// Backoff growth factor
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_forever: false,
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            multiplier: default_multiplier(),
        }
    }
}

impl ReconnectConfig {
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_retries: (!self.retry_forever).then_some(self.max_retries),
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            multiplier: self.multiplier,
        }
    }
}

/// TCP transport tuning
#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    /// Disable Nagle's algorithm
    #[serde(default = "default_true")]
    pub nodelay: bool,
    /// TCP keepalive idle time in seconds (0 = disabled)
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            nodelay: true,
            keepalive_secs: default_keepalive(),
        }
    }
}

/// One logical network and its candidate endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    pub id: NetworkId,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    /// Connection options handed to the connector
    #[serde(default)]
    pub options: NetworkOptions,
}

// Default value functions
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "pretty".to_string() }
fn default_metrics_addr() -> SocketAddr { SocketAddr::from(([127, 0, 0, 1], 9090)) }
fn default_connect_timeout() -> u64 { 20 }
fn default_status_interval() -> u64 { 60 }
fn default_max_retries() -> u32 { 5 }
fn default_initial_delay() -> u64 { 1_000 }
fn default_max_delay() -> u64 { 30_000 }
fn default_multiplier() -> f64 { 2.0 }
fn default_true() -> bool { true }
fn default_keepalive() -> u64 { 60 }

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::parse(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(contents).with_context(|| "Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.connect.timeout_secs == 0 {
            anyhow::bail!("connect.timeout_secs must be > 0");
        }
        if self.reconnect.multiplier.is_nan() || self.reconnect.multiplier < 1.0 {
            anyhow::bail!("reconnect.multiplier must be >= 1.0");
        }
        if self.reconnect.initial_delay_ms > self.reconnect.max_delay_ms {
            anyhow::bail!("reconnect.initial_delay_ms must not exceed max_delay_ms");
        }

        let mut seen = HashSet::new();
        for network in &self.networks {
            if !seen.insert(&network.id) {
                anyhow::bail!("network {} is configured more than once", network.id);
            }
        }
        Ok(())
    }

    /// Manager settings derived from this configuration
    pub fn manager_config(&self) -> ConnectionManagerConfig {
        ConnectionManagerConfig {
            connect_timeout: Duration::from_secs(self.connect.timeout_secs),
            reconnect: self.reconnect.policy(),
        }
    }

    /// Per-network options table
    pub fn options(&self) -> StaticOptions {
        self.networks
            .iter()
            .map(|n| (n.id.clone(), n.options.clone()))
            .collect()
    }

    /// (network, endpoints) pairs for batch connection
    pub fn endpoints(&self) -> Vec<(NetworkId, Vec<Endpoint>)> {
        self.networks
            .iter()
            .map(|n| (n.id.clone(), n.endpoints.clone()))
            .collect()
    }
}
