//! Unordered FIFO queue: no ids, no leases, no partial acknowledgment.

use std::marker::PhantomData;
use std::sync::Arc;

use tracing::debug;

use super::keys::QueueKeys;
use crate::codec::Codec;
use crate::error::Result;
use crate::store::{Batch, KeyStore};

pub struct SimpleWorkQueue<S: KeyStore + ?Sized, T, C: Codec<T>> {
    store: Arc<S>,
    codec: C,
    key: String,
    _item: PhantomData<fn() -> T>,
}

impl<S: KeyStore + ?Sized, T, C: Codec<T>> SimpleWorkQueue<S, T, C> {
    pub fn new(store: Arc<S>, codec: C, namespace: &str) -> Self {
        Self {
            store,
            codec,
            key: QueueKeys::new(namespace).simple(),
            _item: PhantomData,
        }
    }

    pub async fn enqueue(&self, item: &T) -> Result<()> {
        let payload = self.codec.encode(item)?;
        self.store.exec(Batch::new().rpush(&self.key, payload)).await
    }

    /// Remove and return up to `max_batch_size` items, oldest first.
    pub async fn dequeue(&self, max_batch_size: usize) -> Result<Vec<T>> {
        let raw = self.store.lpop(&self.key, max_batch_size).await?;
        debug!(key = %self.key, count = raw.len(), "simple dequeue");
        raw.iter().map(|bytes| self.codec.decode(bytes)).collect()
    }

    pub async fn len(&self) -> Result<u64> {
        self.store.llen(&self.key).await
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}
