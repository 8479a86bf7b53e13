//! Configuration schema for idun.
//!
//! YAML config: server bind address, upstream endpoints, headers, resilience.
//! Env overrides: IDUN_LOG_LEVEL, IDUN_LOG_FORMAT.

use anyhow::Context;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Root config (idun.yaml).
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub global: GlobalConfig,

    pub upstream: UpstreamConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalConfig {
    /// Log level (e.g. "info", "debug"). Env IDUN_LOG_LEVEL overrides when set.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format: "json" or "pretty". Env IDUN_LOG_FORMAT overrides.
    #[serde(default)]
    pub log_format: Option<String>,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub metrics: Option<MetricsConfig>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        GlobalConfig {
            log_level: default_log_level(),
            log_format: None,
            server: ServerConfig::default(),
            metrics: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_server_address")]
    pub address: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            address: default_server_address(),
            port: default_server_port(),
        }
    }
}

fn default_server_address() -> String {
    "127.0.0.1".to_string()
}
fn default_server_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
}

/// Upstream endpoints the credential is forwarded to. Nothing is baked into
/// the binary: every URL and header comes from here.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpstreamConfig {
    /// Credential refresh endpoint (required).
    pub refresh_url: String,

    /// Profile enrichment endpoint. When unset, profile enrichment is skipped
    /// even if the caller asks for it.
    #[serde(default)]
    pub profile_url: Option<String>,

    /// Recently-played-games enrichment endpoint. Same rules as profile_url.
    #[serde(default)]
    pub games_url: Option<String>,

    /// Extra headers applied to every upstream request (e.g. Origin, Referer).
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,

    #[serde(default)]
    pub resilience: Option<ResilienceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResilienceConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

impl Config {
    /// Load and parse config from path, then validate upstream URLs.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let s = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("read config {:?}: {}", path, e))?;
        let config: Config =
            serde_yaml_ng::from_str(&s).map_err(|e| anyhow::anyhow!("parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.upstream.refresh_url.trim().is_empty() {
            anyhow::bail!("upstream.refresh_url must not be empty");
        }
        reqwest::Url::parse(&self.upstream.refresh_url)
            .context("upstream.refresh_url invalid")?;
        if let Some(u) = &self.upstream.profile_url {
            reqwest::Url::parse(u).context("upstream.profile_url invalid")?;
        }
        if let Some(u) = &self.upstream.games_url {
            reqwest::Url::parse(u).context("upstream.games_url invalid")?;
        }
        Ok(())
    }
}
