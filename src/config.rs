//! Configuration
//!
//! Server and client settings, loaded from JSON files. Every optional field
//! has a default, so a minimal server file only names the two tier roots and
//! a minimal client file only lists the fleet.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::fleet::hash::HashKind;
use crate::fleet::types::Node;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("{0}")]
    Invalid(String),
}

fn load<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

// --- Server ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub local_root: PathBuf,
    pub secondary_root: PathBuf,
    /// Seconds between write-back sweeps.
    #[serde(default = "default_export_interval")]
    pub export_interval_secs: u64,
    /// Runtime worker threads serving requests.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    7400
}

fn default_export_interval() -> u64 {
    60
}

fn default_worker_threads() -> usize {
    4
}

impl ServerConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config: ServerConfig = load(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.local_root == self.secondary_root {
            return Err(ConfigError::Invalid(
                "local_root and secondary_root must differ".to_string(),
            ));
        }
        if self.export_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "export_interval_secs must be positive".to_string(),
            ));
        }
        if self.worker_threads == 0 {
            return Err(ConfigError::Invalid(
                "worker_threads must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn export_interval(&self) -> Duration {
        Duration::from_secs(self.export_interval_secs)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// --- Client ---

/// Bounded retry for transport faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 1000,
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefetchConfig {
    /// Zero disables read-ahead.
    pub workers: usize,
    pub queue_depth: usize,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_depth: 64,
        }
    }
}

/// What the client does with a remote protocol error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FatalPolicy {
    /// Abort the process.
    #[default]
    Abort,
    /// Return the error to the caller.
    Propagate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub hash: HashKind,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub prefetch: PrefetchConfig,
    #[serde(default)]
    pub fatal: FatalPolicy,
}

fn default_timeout_ms() -> u64 {
    5000
}

impl ClientConfig {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self {
            nodes,
            hash: HashKind::default(),
            retry: RetryPolicy::default(),
            timeout_ms: default_timeout_ms(),
            prefetch: PrefetchConfig::default(),
            fatal: FatalPolicy::default(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config: ClientConfig = load(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nodes.is_empty() {
            return Err(ConfigError::Invalid("fleet must list at least one node".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be positive".to_string()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
