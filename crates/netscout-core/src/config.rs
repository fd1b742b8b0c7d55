//! Configuration for scans and the service process

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Hard ceiling on worker-pool size
pub const MAX_CONCURRENCY_CEILING: usize = 500;

/// Hard floor for the probe timeout
pub const MIN_TIMEOUT_FLOOR: f64 = 0.5;

/// Per-scan configuration
///
/// `timeout_s` and `initial_concurrency` seed the adaptive controller;
/// when `adaptive` is false they hold for the whole scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Initial per-probe connect timeout, seconds
    pub timeout_s: f64,
    /// Worker pool size at scan start
    pub initial_concurrency: usize,
    /// Ceiling the controller may scale up to
    pub max_concurrency: usize,
    /// Floor the controller may scale the timeout down to, seconds
    pub min_timeout_s: f64,
    /// Run the active probe set instead of the port table alone
    pub enhanced_service_detection: bool,
    /// Let the controller retune concurrency and timeout mid-scan
    pub adaptive: bool,
    /// Skip the cache lookup (a completed scan still stores)
    pub force: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            timeout_s: 1.0,
            initial_concurrency: 50,
            max_concurrency: MAX_CONCURRENCY_CEILING,
            min_timeout_s: MIN_TIMEOUT_FLOOR,
            enhanced_service_detection: true,
            adaptive: true,
            force: false,
        }
    }
}

impl ScanConfig {
    /// Validate field ranges
    pub fn validate(&self) -> Result<()> {
        if !(self.timeout_s > 0.0) {
            return Err(Error::Config("timeout_s must be positive".to_string()));
        }
        if self.initial_concurrency == 0 {
            return Err(Error::Config(
                "initial_concurrency must be at least 1".to_string(),
            ));
        }
        if self.max_concurrency == 0 || self.max_concurrency > MAX_CONCURRENCY_CEILING {
            return Err(Error::Config(format!(
                "max_concurrency must be in 1..={}",
                MAX_CONCURRENCY_CEILING
            )));
        }
        if self.initial_concurrency > self.max_concurrency {
            return Err(Error::Config(
                "initial_concurrency cannot exceed max_concurrency".to_string(),
            ));
        }
        if !(self.min_timeout_s > 0.0) || self.min_timeout_s > self.timeout_s {
            return Err(Error::Config(
                "min_timeout_s must be positive and no larger than timeout_s".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_s)
    }

    pub fn min_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.min_timeout_s)
    }
}

/// Cache TTL policy, keyed by target classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL for loopback and private targets, seconds
    pub private_ttl_s: u64,
    /// TTL for public targets, seconds
    pub public_ttl_s: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            private_ttl_s: 6 * 3600,
            public_ttl_s: 3600,
        }
    }
}

/// Task queue tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Delay before a failed scan is retried, seconds
    pub retry_backoff_s: u64,
    /// Retry budget before a task fails permanently
    pub max_retries: u32,
    /// How long finished task records stay pollable, seconds
    pub retention_s: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            retry_backoff_s: 60,
            max_retries: 3,
            retention_s: 3600,
        }
    }
}

/// Service process configuration, loadable from TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address, e.g. "127.0.0.1:8080"
    #[serde(default = "default_bind")]
    pub bind: String,
    /// SQLite database path; None keeps history in memory only
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub queue: QueueConfig,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            database_path: None,
            scan: ScanConfig::default(),
            cache: CacheConfig::default(),
            queue: QueueConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {:?}: {}", path, e)))?;
        Self::load_from_str(&contents)
    }

    /// Load configuration from a TOML string
    pub fn load_from_str(contents: &str) -> Result<Self> {
        let config: ServerConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.bind.is_empty() {
            return Err(Error::Config("bind address is empty".to_string()));
        }
        self.scan.validate()?;
        if self.queue.max_retries > 10 {
            return Err(Error::Config("max_retries cannot exceed 10".to_string()));
        }
        Ok(())
    }
}
