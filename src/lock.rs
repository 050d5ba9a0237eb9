//! Lease-based mutual exclusion over a single store key.
//!
//! The lock key holds the Unix-millisecond epoch at which the current lease
//! goes stale. A key that is absent, or whose epoch is in the past, can be
//! taken by anyone. Release is a compare-and-delete on the epoch the holder
//! wrote, so a holder whose lease already expired and was taken over cannot
//! release the new holder's lease.

use std::sync::Arc;
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::store::{Batch, Guard, KeyStore};
use crate::telemetry::metrics;

/// Current wall-clock time as Unix milliseconds.
pub fn now_unix_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Parse an epoch stored under `key`.
pub(crate) fn parse_epoch(key: &str, raw: &str) -> Result<i64> {
    raw.trim().parse().map_err(|e| Error::CorruptedValue {
        key: key.to_string(),
        reason: format!("expected epoch millis, got {raw:?}: {e}"),
    })
}

/// Retry policy while waiting for a held lock.
///
/// Backoff doubles after each failed attempt, capped at `max_backoff_ms`,
/// and never sleeps past the caller's acquisition timeout.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 5,
            max_backoff_ms: 100,
        }
    }
}

/// Distributed lock over keys in a [`KeyStore`].
pub struct DistributedLock<S: KeyStore + ?Sized> {
    store: Arc<S>,
    config: LockConfig,
}

impl<S: KeyStore + ?Sized> Clone for DistributedLock<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
        }
    }
}

impl<S: KeyStore + ?Sized> DistributedLock<S> {
    pub fn new(store: Arc<S>, config: LockConfig) -> Self {
        Self { store, config }
    }

    /// Acquire `key` for `lease`, retrying until `acquisition_timeout`.
    ///
    /// Returns the expiry epoch written into the key; pass it to
    /// [`release`](Self::release). Fails with [`Error::LockTimeout`] if the
    /// key stayed held by someone else for the whole timeout.
    pub async fn acquire(
        &self,
        key: &str,
        acquisition_timeout: Duration,
        lease: Duration,
    ) -> Result<i64> {
        let started = Instant::now();
        let lease_ms = lease.as_millis() as i64;
        let mut backoff = Duration::from_millis(self.config.initial_backoff_ms);
        let max_backoff = Duration::from_millis(self.config.max_backoff_ms);
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let now = now_unix_ms();
            let expires_at = now + lease_ms;

            if self.store.set_nx(key, &expires_at.to_string()).await? {
                debug!(key, expires_at, attempts, "lock acquired");
                record_acquisition("acquired");
                return Ok(expires_at);
            }

            if let Some(raw) = self.store.get(key).await? {
                let current = parse_epoch(key, &raw)?;
                if current < now {
                    // Stale lease: take it over only if nobody beat us to it.
                    let applied = self
                        .store
                        .compare_and_swap(
                            &[Guard::value(key, Some(raw))],
                            Batch::new().set(key, expires_at.to_string()),
                        )
                        .await?;
                    if applied {
                        debug!(key, stale = current, expires_at, "stale lock taken over");
                        record_acquisition("taken_over");
                        return Ok(expires_at);
                    }
                }
            }

            let elapsed = started.elapsed();
            if elapsed >= acquisition_timeout {
                warn!(key, attempts, "lock acquisition timed out");
                record_acquisition("timeout");
                return Err(Error::LockTimeout {
                    key: key.to_string(),
                });
            }
            tokio::time::sleep(backoff.min(acquisition_timeout - elapsed)).await;
            backoff = (backoff * 2).min(max_backoff);
        }
    }

    /// Release `key` if it still holds `expires_at`. Returns whether this
    /// call deleted it.
    pub async fn release(&self, key: &str, expires_at: i64) -> Result<bool> {
        let released = self
            .store
            .compare_and_swap(
                &[Guard::value(key, Some(expires_at.to_string()))],
                Batch::new().del(key),
            )
            .await?;
        if released {
            debug!(key, expires_at, "lock released");
        } else {
            warn!(key, expires_at, "lock no longer ours, not released");
        }
        Ok(released)
    }

    /// Read the expiry epoch currently stored under `key`.
    pub async fn current_epoch(&self, key: &str) -> Result<Option<i64>> {
        match self.store.get(key).await? {
            Some(raw) => parse_epoch(key, &raw).map(Some),
            None => Ok(None),
        }
    }
}

fn record_acquisition(result: &'static str) {
    metrics::lock_acquisitions().add(1, &[KeyValue::new("result", result)]);
}
