//! Configuration loader and validator for the RESTBase update worker.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::jobs::PartitionLimits;
use crate::urls::{derive_domain, RestbaseUrls};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub restbase: Restbase,
    pub wiki: Wiki,
    pub jobs: Jobs,
    pub worker: Worker,
    #[serde(default)]
    pub http: Http,
}

/// Where invalidation requests go.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Restbase {
    pub server: String,
    /// Defaults to the host of `wiki.canonical_server`.
    #[serde(default)]
    pub domain: Option<String>,
    pub api_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Wiki {
    pub canonical_server: String,
}

/// Partitioning limits for backlink fan-out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jobs {
    pub rows_per_job: usize,
    pub titles_per_batch: usize,
}

/// Queue worker settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Worker {
    pub database_url: String,
    pub concurrency: usize,
    pub poll_interval_ms: u64,
    pub max_backoff_seconds: u64,
    /// A claim older than this is considered abandoned and may be taken
    /// again by another worker.
    #[serde(default = "default_claim_lease_seconds")]
    pub claim_lease_seconds: u64,
}

fn default_claim_lease_seconds() -> u64 {
    600
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Http {
    pub user_agent: String,
    pub timeout_seconds: u64,
}

impl Default for Http {
    fn default() -> Self {
        Self {
            user_agent: concat!("restbase-update/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout_seconds: 60,
        }
    }
}

impl Config {
    pub fn restbase_domain(&self) -> String {
        match self.restbase.domain.as_deref().map(str::trim) {
            Some(domain) if !domain.is_empty() => domain.to_string(),
            _ => derive_domain(&self.wiki.canonical_server),
        }
    }

    pub fn restbase_urls(&self) -> RestbaseUrls {
        RestbaseUrls::new(
            &self.restbase.server,
            &self.restbase_domain(),
            &self.restbase.api_version,
        )
    }

    pub fn partition_limits(&self) -> PartitionLimits {
        PartitionLimits {
            rows_per_job: self.jobs.rows_per_job,
            titles_per_batch: self.jobs.titles_per_batch,
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_seconds)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    let server = cfg.restbase.server.trim();
    if server.is_empty() {
        return Err(ConfigError::Invalid("restbase.server must be non-empty"));
    }
    if !(server.starts_with("http://") || server.starts_with("https://")) {
        return Err(ConfigError::Invalid("restbase.server must be an http(s) URL"));
    }
    if cfg.restbase.api_version.trim().is_empty() {
        return Err(ConfigError::Invalid("restbase.api_version must be non-empty"));
    }
    if cfg.restbase_domain().is_empty() {
        return Err(ConfigError::Invalid(
            "restbase.domain or wiki.canonical_server must be non-empty",
        ));
    }

    if cfg.jobs.rows_per_job == 0 {
        return Err(ConfigError::Invalid("jobs.rows_per_job must be > 0"));
    }
    if cfg.jobs.titles_per_batch == 0 {
        return Err(ConfigError::Invalid("jobs.titles_per_batch must be > 0"));
    }

    if cfg.worker.database_url.trim().is_empty() {
        return Err(ConfigError::Invalid("worker.database_url must be non-empty"));
    }
    if cfg.worker.concurrency == 0 {
        return Err(ConfigError::Invalid("worker.concurrency must be > 0"));
    }
    if cfg.worker.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid("worker.poll_interval_ms must be > 0"));
    }

    if cfg.worker.claim_lease_seconds <= cfg.http.timeout_seconds {
        return Err(ConfigError::Invalid(
            "worker.claim_lease_seconds must exceed http.timeout_seconds",
        ));
    }

    if cfg.http.timeout_seconds == 0 {
        return Err(ConfigError::Invalid("http.timeout_seconds must be > 0"));
    }

    Ok(())
}

/// Example configuration with the default limits.
pub fn example() -> &'static str {
    r#"restbase:
  server: "http://localhost:7231"
  api_version: "v1"

wiki:
  canonical_server: "https://en.example.org"

jobs:
  rows_per_job: 300
  titles_per_batch: 10

worker:
  database_url: "sqlite://./data/restbase-update.db"
  concurrency: 4
  poll_interval_ms: 500
  max_backoff_seconds: 600
  claim_lease_seconds: 600

http:
  user_agent: "restbase-update/0.2"
  timeout_seconds: 60
"#
}
