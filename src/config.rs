use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use thiserror::Error;

use crate::source::ControlEndpoint;

/// Prefix shared by every environment override.
pub const ENV_PREFIX: &str = "PUMAWATCH_";

/// Startup precondition failures. Fatal, unlike per-iteration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("control server is not configured: set control.url when telemetry is enabled")]
    MissingControlUrl,

    #[error("invalid control url {0:?}: expected unix://<path> or tcp://<host>:<port>")]
    InvalidControlUrl(String),
}

/// Top-level configuration for the pumawatch agent.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Logging verbosity (trace, debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Master switch. When false, the scheduler never starts. Default: false.
    #[serde(default)]
    pub enabled: bool,

    /// Control server connection configuration.
    #[serde(default)]
    pub control: ControlConfig,

    /// How often to poll the control server. Default: 5s.
    #[serde(default = "default_collect_frequency", with = "humantime_serde")]
    pub collect_frequency: Duration,

    /// How often to flush completed windows. Also the window size. Default: 60s.
    #[serde(default = "default_send_frequency", with = "humantime_serde")]
    pub send_frequency: Duration,

    /// Skip logging fetch failures caused by a missing control socket.
    /// Default: true.
    #[serde(default = "default_true")]
    pub suppress_not_found: bool,

    /// Maximum time `stop()` waits for the cadences to wind down. Default: 5s.
    #[serde(default = "default_stop_timeout", with = "humantime_serde")]
    pub stop_timeout: Duration,

    /// Publisher configuration.
    #[serde(default)]
    pub publish: PublishConfig,

    /// Prometheus health metrics server configuration.
    #[serde(default)]
    pub health: HealthConfig,
}

/// Control server connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlConfig {
    /// `unix://<path>` or `tcp://<host>:<port>`.
    #[serde(default)]
    pub url: Option<String>,

    /// Token forwarded as the `token` query parameter.
    #[serde(default)]
    pub auth_token: String,

    /// Upper bound for a single fetch. Default: 5s.
    #[serde(default = "default_control_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

/// Publisher configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PublishConfig {
    /// Namespace attached to every publish call. Default: "Puma".
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// HTTP publisher. When disabled, data points are written to the log.
    #[serde(default)]
    pub http: HttpPublishConfig,
}

/// HTTP publisher configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpPublishConfig {
    /// Enable the HTTP publisher. Default: false.
    #[serde(default)]
    pub enabled: bool,

    /// HTTP endpoint to send data to.
    #[serde(default)]
    pub address: String,

    /// Additional HTTP headers.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Compression algorithm (none, gzip, zstd, zlib, snappy). Default: none.
    #[serde(default = "default_compression")]
    pub compression: String,

    /// Maximum duration of one publish request. Default: 10s.
    #[serde(default = "default_publish_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

/// Prometheus health metrics server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    /// Serve `/metrics` and `/healthz`. Default: false.
    #[serde(default)]
    pub enabled: bool,

    /// Listen address. Default: ":9090".
    #[serde(default = "default_health_addr")]
    pub addr: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_collect_frequency() -> Duration {
    Duration::from_secs(5)
}

fn default_send_frequency() -> Duration {
    Duration::from_secs(60)
}

fn default_stop_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_control_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_true() -> bool {
    true
}

fn default_namespace() -> String {
    "Puma".to_string()
}

fn default_compression() -> String {
    "none".to_string()
}

fn default_publish_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_health_addr() -> String {
    ":9090".to_string()
}

// --- Default trait impls ---

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            enabled: false,
            control: ControlConfig::default(),
            collect_frequency: default_collect_frequency(),
            send_frequency: default_send_frequency(),
            suppress_not_found: true,
            stop_timeout: default_stop_timeout(),
            publish: PublishConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            url: None,
            auth_token: String::new(),
            timeout: default_control_timeout(),
        }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            http: HttpPublishConfig::default(),
        }
    }
}

impl Default for HttpPublishConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: String::new(),
            headers: HashMap::new(),
            compression: default_compression(),
            timeout: default_publish_timeout(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: default_health_addr(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file, apply environment overrides, and
    /// validate.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        Self::from_yaml(&data).with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Parse configuration from YAML text, then apply environment overrides
    /// and validate.
    pub fn from_yaml(data: &str) -> Result<Self> {
        // An empty document is a valid, all-defaults config.
        let mut cfg: Config = if data.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(data)?
        };

        cfg.apply_env_overrides(|key| std::env::var(key).ok())?;
        cfg.validate()?;

        Ok(cfg)
    }

    /// Defaults plus environment overrides, for running without a file.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Config::default();
        cfg.apply_env_overrides(|key| std::env::var(key).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply `PUMAWATCH_*` overrides resolved through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            let key = format!("{ENV_PREFIX}{name}");
            lookup(&key).map(|value| (key, value))
        };

        if let Some((key, value)) = var("ENABLED") {
            self.enabled = parse_bool(&value).with_context(|| format!("invalid {key}"))?;
        }

        if let Some((key, value)) = var("COLLECT_FREQUENCY") {
            self.collect_frequency = parse_seconds(&value).with_context(|| format!("invalid {key}"))?;
        }

        if let Some((key, value)) = var("SEND_FREQUENCY") {
            self.send_frequency = parse_seconds(&value).with_context(|| format!("invalid {key}"))?;
        }

        if let Some((_, value)) = var("NAMESPACE") {
            self.publish.namespace = value;
        }

        if let Some((_, value)) = var("CONTROL_URL") {
            self.control.url = (!value.is_empty()).then_some(value);
        }

        if let Some((_, value)) = var("CONTROL_AUTH_TOKEN") {
            self.control.auth_token = value;
        }

        Ok(())
    }

    /// Validate the configuration for consistency.
    ///
    /// A missing control URL is accepted here; the scheduler rejects it at
    /// startup when telemetry is enabled.
    pub fn validate(&self) -> Result<()> {
        if self.collect_frequency.is_zero() {
            bail!("collect_frequency must be positive");
        }

        if self.send_frequency.is_zero() {
            bail!("send_frequency must be positive");
        }

        if self.send_frequency.as_secs() == 0 {
            bail!("send_frequency must be at least one second");
        }

        if let Some(url) = &self.control.url {
            ControlEndpoint::parse(url)?;
        }

        if self.control.timeout.is_zero() {
            bail!("control.timeout must be positive");
        }

        if self.publish.namespace.is_empty() {
            bail!("publish.namespace must not be empty");
        }

        let http = &self.publish.http;
        if http.enabled && http.address.is_empty() {
            bail!("publish.http.address is required when enabled");
        }

        match http.compression.as_str() {
            "none" | "gzip" | "zstd" | "zlib" | "snappy" => {}
            compression => bail!("invalid compression type: {compression}"),
        }

        Ok(())
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => bail!("expected a boolean, got {other:?}"),
    }
}

fn parse_seconds(value: &str) -> Result<Duration> {
    let secs: u64 = value
        .trim()
        .parse()
        .with_context(|| format!("expected whole seconds, got {value:?}"))?;
    Ok(Duration::from_secs(secs))
}
