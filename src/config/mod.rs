//! Typed configuration.
//!
//! Process settings load once from environment variables and fail fast if
//! required vars are missing. The Redis URL may carry a password, so it is
//! wrapped in `secrecy::SecretString` to keep it out of logs.
//!
//! Queue timings live in [`QueueConfig`], which can also be read from TOML.

use std::path::Path;
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::lock::LockConfig;

#[derive(Debug)]
pub struct Config {
    pub redis_url: SecretString,
    pub namespace: String,
    pub pool_size: usize,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let pool_size = match std::env::var("REDIS_POOL_SIZE") {
            Ok(raw) => raw
                .parse()
                .map_err(|e| Error::Config(format!("REDIS_POOL_SIZE={raw:?} is invalid: {e}")))?,
            Err(_) => 16,
        };
        Ok(Self {
            redis_url: SecretString::from(required_var("REDIS_URL")?),
            namespace: std::env::var("SEQUEUE_NAMESPACE").unwrap_or_else(|_| "sequeue".to_string()),
            pool_size,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

/// Timings and key namespace for one sequential queue.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Prefix for every store key the queue touches.
    pub namespace: String,
    /// How long a dequeued batch stays exclusively leased to its consumer.
    pub lease_duration_ms: u64,
    /// How long Dequeue waits for the per-id lease.
    pub dequeue_lock_timeout_ms: u64,
    /// How long PrepareNextWorkItem waits for the short claim lock.
    pub claim_lock_timeout_ms: u64,
    /// Lease on the claim lock, in case a scheduler dies while claiming.
    pub claim_lease_ms: u64,
    /// Minimum gap between opportunistic zombie sweeps.
    pub harvest_interval_ms: u64,
    pub lock: LockConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            namespace: "sequeue".to_string(),
            lease_duration_ms: 30_000,
            dequeue_lock_timeout_ms: 1_000,
            claim_lock_timeout_ms: 250,
            claim_lease_ms: 5_000,
            harvest_interval_ms: 60_000,
            lock: LockConfig::default(),
        }
    }
}

impl QueueConfig {
    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    /// Parse a `[queue]` table from TOML. Missing fields take defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        #[derive(Deserialize)]
        struct Wrapper {
            #[serde(default)]
            queue: QueueConfig,
        }
        let wrapper: Wrapper = toml::from_str(content)
            .map_err(|e| Error::Config(format!("bad queue config: {e}")))?;
        let config = wrapper.queue;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read queue config {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(Error::Config("queue namespace must not be empty".to_string()));
        }
        if self.lease_duration_ms == 0 || self.claim_lease_ms == 0 {
            return Err(Error::Config("lease durations must be positive".to_string()));
        }
        Ok(())
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_millis(self.lease_duration_ms)
    }

    pub fn dequeue_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_lock_timeout_ms)
    }

    pub fn claim_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.claim_lock_timeout_ms)
    }

    pub fn claim_lease(&self) -> Duration {
        Duration::from_millis(self.claim_lease_ms)
    }
}
