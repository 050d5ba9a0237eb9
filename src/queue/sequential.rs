//! Sequential work queue engine.
//!
//! Items are grouped by a caller-chosen id. Items sharing an id are handed
//! out strictly in enqueue order and only one consumer at a time may hold an
//! id's backlog. Per id the lifecycle is:
//!
//! ```text
//! Idle -> Backlogged -> Claimed (in pending) -> Leased -> Idle | Backlogged
//! ```
//!
//! A consumer that dies while `Leased` leaves a lease that eventually goes
//! stale; [`SequentialWorkQueue::harvest_zombies`] moves such ids back to
//! `Backlogged` so their items are delivered again.

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use opentelemetry::KeyValue;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::keys::QueueKeys;
use super::session::DequeueSession;
use crate::codec::Codec;
use crate::config::QueueConfig;
use crate::error::{Error, Result};
use crate::lock::{DistributedLock, now_unix_ms, parse_epoch};
use crate::store::{Batch, Guard, KeyStore, ScoreRange};
use crate::telemetry::metrics;

/// Backlog score marking an id as claimed. 2^53, the largest integer an f64
/// holds exactly.
pub const CLAIMED_SCORE: f64 = 9_007_199_254_740_992.0;

/// Producers keep decrementing a claimed id's score, so anything in the upper
/// half of the sentinel still counts as claimed.
const CLAIMED_THRESHOLD: f64 = CLAIMED_SCORE / 2.0;

/// Upper bound on guarded-commit retries against concurrent producers.
const MAX_SETTLE_ATTEMPTS: u32 = 16;

const ALL: usize = i64::MAX as usize;

pub fn is_claimed_score(score: f64) -> bool {
    score >= CLAIMED_THRESHOLD
}

/// A consumer's exclusive hold on one id's backlog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub id: String,
    /// Unix millis after which the lease is stale and can be reclaimed.
    pub expires_at: i64,
}

/// One row of the backlog sorted set.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BacklogEntry {
    pub id: String,
    pub score: f64,
    pub claimed: bool,
}

impl BacklogEntry {
    /// Unprocessed item count, or `None` while the id is claimed.
    pub fn backlog(&self) -> Option<u64> {
        (!self.claimed).then(|| (-self.score) as u64)
    }
}

/// Point-in-time view of the queue's shared structures.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub namespace: String,
    pub backlog: Vec<BacklogEntry>,
    pub pending: u64,
    pub leased: Vec<String>,
}

/// Per-id ordered work queue. Cheap to clone; clones share the store.
pub struct SequentialWorkQueue<S: KeyStore + ?Sized, T, C: Codec<T>> {
    store: Arc<S>,
    codec: Arc<C>,
    lock: DistributedLock<S>,
    keys: QueueKeys,
    config: Arc<QueueConfig>,
    last_harvest_ms: Arc<AtomicI64>,
    _item: PhantomData<fn() -> T>,
}

impl<S: KeyStore + ?Sized, T, C: Codec<T>> Clone for SequentialWorkQueue<S, T, C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            codec: Arc::clone(&self.codec),
            lock: self.lock.clone(),
            keys: self.keys.clone(),
            config: Arc::clone(&self.config),
            last_harvest_ms: Arc::clone(&self.last_harvest_ms),
            _item: PhantomData,
        }
    }
}

impl<S: KeyStore + ?Sized, T, C: Codec<T>> SequentialWorkQueue<S, T, C> {
    pub fn new(store: Arc<S>, codec: C, config: QueueConfig) -> Self {
        let lock = DistributedLock::new(Arc::clone(&store), config.lock.clone());
        Self {
            store,
            codec: Arc::new(codec),
            lock,
            keys: QueueKeys::new(config.namespace.clone()),
            config: Arc::new(config),
            last_harvest_ms: Arc::new(AtomicI64::new(0)),
            _item: PhantomData,
        }
    }

    pub fn keys(&self) -> &QueueKeys {
        &self.keys
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Append `item` to `id`'s list and grow its backlog by one.
    ///
    /// Needs no lock: the append and the score decrement commute with every
    /// other producer and go out as one batch.
    pub async fn enqueue(&self, id: &str, item: &T) -> Result<()> {
        if id.is_empty() {
            return Err(Error::Other("work item id must not be empty".to_string()));
        }
        let payload = self.codec.encode(item)?;
        self.store
            .exec(
                Batch::new()
                    .rpush(self.keys.items(id), payload)
                    .zincr_by(self.keys.backlog(), id, -1.0),
            )
            .await?;
        debug!(queue = self.keys.namespace(), id, "enqueued");
        self.record_op("enqueue");
        Ok(())
    }

    /// Claim the most backlogged eligible id and push it onto `pending`.
    ///
    /// Runs a zombie sweep first when the harvest interval has elapsed.
    /// Returns `false` when nothing is eligible or another scheduler is
    /// claiming the same id right now.
    pub async fn prepare_next_work_item(&self) -> Result<bool> {
        self.maybe_harvest().await?;

        let candidates = self
            .store
            .zrange_by_score(&self.keys.backlog(), ScoreRange::at_most(-1.0), 1)
            .await?;
        let Some((id, _)) = candidates.into_iter().next() else {
            return Ok(false);
        };

        let claim_key = self.keys.claim_lock(&id);
        let epoch = match self
            .lock
            .acquire(
                &claim_key,
                self.config.claim_lock_timeout(),
                self.config.claim_lease(),
            )
            .await
        {
            Ok(epoch) => epoch,
            Err(Error::LockTimeout { .. }) => {
                debug!(id, "another scheduler is claiming this id");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        let claimed = self.claim(&id).await;
        let released = self.lock.release(&claim_key, epoch).await;
        let claimed = claimed?;
        released?;
        Ok(claimed)
    }

    /// Move `id` to claimed, leased and pending as one batch. Caller holds
    /// the claim lock.
    async fn claim(&self, id: &str) -> Result<bool> {
        match self.store.zscore(&self.keys.backlog(), id).await? {
            None => {
                debug!(id, "id drained before it could be claimed");
                Ok(false)
            }
            Some(score) if is_claimed_score(score) => {
                debug!(id, "id already claimed");
                Ok(false)
            }
            Some(score) => {
                self.store
                    .exec(
                        Batch::new()
                            .zadd(self.keys.backlog(), id, CLAIMED_SCORE)
                            .sadd(self.keys.leased(), id)
                            .rpush(self.keys.pending(), id.as_bytes().to_vec()),
                    )
                    .await?;
                info!(queue = self.keys.namespace(), id, backlog = -score, "claimed");
                self.record_op("claim");
                Ok(true)
            }
        }
    }

    /// Take the next claimed id from `pending` and lease up to
    /// `max_batch_size` of its items.
    ///
    /// Returns an empty session when `pending` is empty or the id had no
    /// items left. Items stay in the store until the session commits.
    pub async fn dequeue(&self, max_batch_size: usize) -> Result<DequeueSession<S, T, C>> {
        if max_batch_size == 0 {
            return Ok(DequeueSession::empty(self.clone(), None));
        }

        let Some(raw_id) = self
            .store
            .lpop(&self.keys.pending(), 1)
            .await?
            .into_iter()
            .next()
        else {
            return Ok(DequeueSession::empty(self.clone(), None));
        };
        let id = String::from_utf8(raw_id).map_err(|e| Error::CorruptedValue {
            key: self.keys.pending(),
            reason: format!("id is not utf-8: {e}"),
        })?;

        // Batch sizes past i64::MAX mean "everything".
        let stop = i64::try_from(max_batch_size).map_or(-1, |n| n - 1);
        let raw_items = match self.store.lrange(&self.keys.items(&id), 0, stop).await {
            Ok(items) => items,
            Err(e) => {
                self.abandon_claim(&id).await;
                return Err(e);
            }
        };

        if raw_items.is_empty() {
            // Nothing to hand out; release the claim so the id is not stranded.
            self.settle(&id, 0, None).await?;
            debug!(id, "claimed id had no items");
            return Ok(DequeueSession::empty(self.clone(), Some(id)));
        }

        let expires_at = match self
            .lock
            .acquire(
                &self.keys.lease(&id),
                self.config.dequeue_lock_timeout(),
                self.config.lease_duration(),
            )
            .await
        {
            Ok(epoch) => epoch,
            Err(e) => {
                self.abandon_claim(&id).await;
                return Err(e);
            }
        };
        let lease = Lease {
            id: id.clone(),
            expires_at,
        };

        let items = match raw_items
            .iter()
            .map(|raw| self.codec.decode(raw))
            .collect::<Result<Vec<T>>>()
        {
            Ok(items) => items,
            Err(e) => {
                if let Err(unlock_err) = self.unlock(&lease).await {
                    warn!(id, error = %unlock_err, "unlock after decode failure failed");
                }
                return Err(e);
            }
        };

        info!(
            queue = self.keys.namespace(),
            id,
            count = items.len(),
            expires_at,
            "dequeued"
        );
        self.record_op("dequeue");
        Ok(DequeueSession::new(self.clone(), lease, items))
    }

    /// Best-effort release of a claim whose lease was never taken.
    async fn abandon_claim(&self, id: &str) {
        if let Err(e) = self.settle(id, 0, None).await {
            warn!(id, error = %e, "failed to release claim after dequeue error");
        }
    }

    /// Overwrite the item at `index` in `id`'s list.
    pub async fn update(&self, id: &str, index: usize, item: &T) -> Result<()> {
        let payload = self.codec.encode(item)?;
        self.store
            .exec(Batch::new().lset(self.keys.items(id), index as i64, payload))
            .await?;
        debug!(id, index, "item updated");
        self.record_op("update");
        Ok(())
    }

    /// Overwrite the item at `index` only while `lease` still holds the id.
    ///
    /// Returns `false`, leaving the list untouched, once the lease has been
    /// reclaimed or released.
    pub async fn update_leased(&self, lease: &Lease, index: usize, item: &T) -> Result<bool> {
        let payload = self.codec.encode(item)?;
        let applied = self
            .store
            .compare_and_swap(
                &[Guard::value(
                    self.keys.lease(&lease.id),
                    Some(lease.expires_at.to_string()),
                )],
                Batch::new().lset(self.keys.items(&lease.id), index as i64, payload),
            )
            .await?;
        if applied {
            debug!(id = %lease.id, index, "leased item updated");
            self.record_op("update");
        } else {
            warn!(id = %lease.id, index, "lease lost, item not updated");
        }
        Ok(applied)
    }

    /// Remove `count` items from the head of `id`'s list. No-op for
    /// `count <= 0`.
    pub async fn pop(&self, id: &str, count: i64) -> Result<()> {
        if count <= 0 {
            return Ok(());
        }
        self.store
            .exec(Batch::new().ltrim(self.keys.items(id), count, -1))
            .await?;
        debug!(id, count, "popped");
        self.record_op("pop");
        Ok(())
    }

    /// Recompute the id's backlog from its list, release the lease, and drop
    /// the id from `leased`.
    ///
    /// Returns `false` if the lease no longer belongs to `lease`, in which
    /// case nothing was changed.
    pub async fn unlock(&self, lease: &Lease) -> Result<bool> {
        self.settle(&lease.id, 0, Some(lease.expires_at.to_string()))
            .await
    }

    /// Pop `count` items and unlock, as one guarded commit.
    pub async fn pop_and_unlock(&self, lease: &Lease, count: usize) -> Result<bool> {
        self.settle(&lease.id, count, Some(lease.expires_at.to_string()))
            .await
    }

    /// Shared commit path for unlock, pop-and-unlock, claim release and
    /// zombie reclamation.
    ///
    /// Guarded on the lease key still holding `expected_lease` and on the
    /// list length read just before, so no item appended in between is lost
    /// from the backlog count and a superseded holder cannot pop.
    async fn settle(&self, id: &str, pop_count: usize, expected_lease: Option<String>) -> Result<bool> {
        let items_key = self.keys.items(id);
        let lease_key = self.keys.lease(id);
        let mut backoff = Duration::from_millis(self.config.lock.initial_backoff_ms);
        let max_backoff = Duration::from_millis(self.config.lock.max_backoff_ms);

        for attempt in 1..=MAX_SETTLE_ATTEMPTS {
            let len = self.store.llen(&items_key).await?;
            let popped = (pop_count as u64).min(len);
            let remaining = len - popped;

            let mut batch = Batch::new();
            if popped > 0 {
                batch = batch.ltrim(&items_key, popped as i64, -1);
            }
            batch = if remaining == 0 {
                batch.zrem(self.keys.backlog(), id)
            } else {
                batch.zadd(self.keys.backlog(), id, -(remaining as f64))
            };
            batch = batch.srem(self.keys.leased(), id).del(&lease_key);

            let guards = [
                Guard::value(&lease_key, expected_lease.clone()),
                Guard::list_len(&items_key, len),
            ];
            if self.store.compare_and_swap(&guards, batch).await? {
                debug!(id, popped, remaining, attempt, "settled");
                self.record_op("unlock");
                return Ok(true);
            }

            if self.store.get(&lease_key).await? != expected_lease {
                warn!(id, "lease changed hands, leaving id to its current owner");
                return Ok(false);
            }
            // A producer appended between the read and the commit.
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(max_backoff);
        }

        Err(Error::RaceLost { key: items_key })
    }

    /// Reclaim every leased id whose lease has gone stale.
    ///
    /// Returns whether at least one id was reclaimed. Races with other
    /// harvesters are skipped per id.
    pub async fn harvest_zombies(&self) -> Result<bool> {
        self.last_harvest_ms.store(now_unix_ms(), Ordering::Relaxed);
        let ids = self.store.smembers(&self.keys.leased()).await?;
        let mut reclaimed = 0u64;

        for id in &ids {
            match self.try_force_release_lock(id).await {
                Ok(true) => reclaimed += 1,
                Ok(false) => {}
                Err(e) if e.is_retryable() => {
                    debug!(id, error = %e, "zombie reclaim raced, skipping");
                }
                Err(e) => return Err(e),
            }
        }

        if reclaimed > 0 {
            info!(queue = self.keys.namespace(), reclaimed, scanned = ids.len(), "harvested zombies");
            metrics::zombies_reclaimed().add(
                reclaimed,
                &[KeyValue::new("queue", self.keys.namespace().to_string())],
            );
        }
        Ok(reclaimed > 0)
    }

    /// Reclaim `id` if its lease key holds a stale epoch.
    ///
    /// Returns whether this call performed the reclamation. An absent or
    /// zero lease means there is nothing to reclaim; a live lease is left
    /// alone.
    pub async fn try_force_release_lock(&self, id: &str) -> Result<bool> {
        let lease_key = self.keys.lease(id);
        let Some(raw) = self.store.get(&lease_key).await? else {
            return Ok(false);
        };

        match parse_epoch(&lease_key, &raw) {
            Ok(0) => return Ok(false),
            Ok(epoch) if epoch >= now_unix_ms() => return Ok(false),
            Ok(_) => {}
            Err(e) => warn!(id, error = %e, "reclaiming unreadable lease"),
        }

        let reclaimed = self.settle(id, 0, Some(raw)).await?;
        if reclaimed {
            info!(queue = self.keys.namespace(), id, "reclaimed zombie lease");
        }
        Ok(reclaimed)
    }

    async fn maybe_harvest(&self) -> Result<()> {
        let now = now_unix_ms();
        let last = self.last_harvest_ms.load(Ordering::Relaxed);
        if now - last < self.config.harvest_interval_ms as i64 {
            return Ok(());
        }
        // Another task in this process may have just started a sweep.
        if self
            .last_harvest_ms
            .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            return Ok(());
        }
        self.harvest_zombies().await?;
        Ok(())
    }

    /// Number of unpopped items for `id`.
    pub async fn item_count(&self, id: &str) -> Result<u64> {
        self.store.llen(&self.keys.items(id)).await
    }

    /// Raw backlog score for `id`, if it is in the backlog.
    pub async fn backlog_score(&self, id: &str) -> Result<Option<f64>> {
        self.store.zscore(&self.keys.backlog(), id).await
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        let backlog = self
            .store
            .zrange_by_score(
                &self.keys.backlog(),
                ScoreRange::new(f64::NEG_INFINITY, f64::INFINITY),
                ALL,
            )
            .await?
            .into_iter()
            .map(|(id, score)| BacklogEntry {
                id,
                score,
                claimed: is_claimed_score(score),
            })
            .collect();
        Ok(QueueStats {
            namespace: self.keys.namespace().to_string(),
            backlog,
            pending: self.store.llen(&self.keys.pending()).await?,
            leased: self.store.smembers(&self.keys.leased()).await?,
        })
    }

    fn record_op(&self, operation: &'static str) {
        metrics::queue_operations().add(
            1,
            &[
                KeyValue::new("queue", self.keys.namespace().to_string()),
                KeyValue::new("operation", operation),
            ],
        );
    }
}
