//! Time-windowed queue.
//!
//! Items are keyed by id and scored by a timestamp. Dequeue takes the oldest
//! items inside `[min, max]` and deletes them in the same request; there is
//! no lease, so two consumers asking for overlapping windows at the same
//! instant may both receive an item.

use std::marker::PhantomData;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use super::keys::QueueKeys;
use crate::codec::Codec;
use crate::error::Result;
use crate::store::{Batch, KeyStore, ScoreRange};

pub struct ChronologicalWorkQueue<S: KeyStore + ?Sized, T, C: Codec<T>> {
    store: Arc<S>,
    codec: C,
    keys: QueueKeys,
    _item: PhantomData<fn() -> T>,
}

fn score(at: DateTime<Utc>) -> f64 {
    at.timestamp_millis() as f64
}

impl<S: KeyStore + ?Sized, T, C: Codec<T>> ChronologicalWorkQueue<S, T, C> {
    pub fn new(store: Arc<S>, codec: C, namespace: &str) -> Self {
        Self {
            store,
            codec,
            keys: QueueKeys::new(namespace),
            _item: PhantomData,
        }
    }

    /// Store `item` under `id` at time `at`. Re-enqueueing an id replaces
    /// its payload and moves it to the new time.
    pub async fn enqueue(&self, id: &str, item: &T, at: DateTime<Utc>) -> Result<()> {
        let payload = self.codec.encode(item)?;
        self.store
            .exec(
                Batch::new()
                    .hset(self.keys.chrono_items(), id, payload)
                    .zadd(self.keys.chrono_index(), id, score(at)),
            )
            .await
    }

    /// Remove and return up to `max_batch_size` items timed within
    /// `[min, max]`, oldest first.
    pub async fn dequeue(
        &self,
        min: DateTime<Utc>,
        max: DateTime<Utc>,
        max_batch_size: usize,
    ) -> Result<Vec<(String, T)>> {
        if max_batch_size == 0 {
            return Ok(Vec::new());
        }
        let ids: Vec<String> = self
            .store
            .zrange_by_score(
                &self.keys.chrono_index(),
                ScoreRange::new(score(min), score(max)),
                max_batch_size,
            )
            .await?
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let payloads = self.store.hmget(&self.keys.chrono_items(), &ids).await?;
        let mut batch = Batch::new();
        for id in &ids {
            batch = batch
                .zrem(self.keys.chrono_index(), id)
                .hdel(self.keys.chrono_items(), id);
        }
        self.store.exec(batch).await?;
        debug!(namespace = self.keys.namespace(), count = ids.len(), "chronological dequeue");

        ids.into_iter()
            .zip(payloads)
            .filter_map(|(id, payload)| payload.map(|bytes| (id, bytes)))
            .map(|(id, bytes)| Ok((id, self.codec.decode(&bytes)?)))
            .collect()
    }

    pub async fn len(&self) -> Result<u64> {
        self.store.zcard(&self.keys.chrono_index()).await
    }
}
