//! Key-value store primitives the queues are built on.
//!
//! The store exposes sorted sets, lists, sets, hashes, and plain string keys,
//! plus two ways of mutating several keys as one unit:
//!
//! - [`KeyStore::exec`] submits a [`Batch`] atomically (MULTI/EXEC).
//! - [`KeyStore::compare_and_swap`] submits a [`Batch`] only if every
//!   [`Guard`] still holds at commit time (WATCH + MULTI/EXEC).
//!
//! Every queue mutation that other workers must observe atomically goes
//! through one of those two calls, never through a sequence of single
//! commands.

pub mod batch;
pub mod memory;
pub mod redis;

pub use self::batch::{Batch, Guard, Op};
pub use self::memory::InMemoryStore;
pub use self::redis::RedisStore;

use crate::error::Result;
use async_trait::async_trait;

/// Inclusive score bounds for sorted-set range reads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreRange {
    pub min: f64,
    pub max: f64,
}

impl ScoreRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Everything with a score `<= max`.
    pub fn at_most(max: f64) -> Self {
        Self {
            min: f64::NEG_INFINITY,
            max,
        }
    }

    pub fn contains(&self, score: f64) -> bool {
        score >= self.min && score <= self.max
    }
}

/// Remote store contract consumed by the queues and the lock.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Read a string key.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set a string key only if it does not exist. Returns whether it was set.
    async fn set_nx(&self, key: &str, value: &str) -> Result<bool>;

    /// Length of a list (0 when absent).
    async fn llen(&self, key: &str) -> Result<u64>;

    /// List elements between `start` and `stop` inclusive (negative indexes
    /// count from the tail).
    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<Vec<u8>>>;

    /// Remove and return up to `count` elements from the head of a list.
    async fn lpop(&self, key: &str, count: usize) -> Result<Vec<Vec<u8>>>;

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>>;

    /// Number of members in a sorted set (0 when absent).
    async fn zcard(&self, key: &str) -> Result<u64>;

    /// Members within `range`, lowest score first, at most `limit` of them.
    async fn zrange_by_score(
        &self,
        key: &str,
        range: ScoreRange,
        limit: usize,
    ) -> Result<Vec<(String, f64)>>;

    async fn smembers(&self, key: &str) -> Result<Vec<String>>;

    async fn hmget(&self, key: &str, fields: &[String]) -> Result<Vec<Option<Vec<u8>>>>;

    /// Apply every op in `batch` as one atomic unit.
    async fn exec(&self, batch: Batch) -> Result<()>;

    /// Apply `batch` atomically only if all `guards` hold. `Ok(false)` means a
    /// guard failed or a watched key changed before commit.
    async fn compare_and_swap(&self, guards: &[Guard], batch: Batch) -> Result<bool>;
}

#[async_trait]
impl<T: KeyStore + ?Sized> KeyStore for std::sync::Arc<T> {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key).await
    }

    async fn set_nx(&self, key: &str, value: &str) -> Result<bool> {
        (**self).set_nx(key, value).await
    }

    async fn llen(&self, key: &str) -> Result<u64> {
        (**self).llen(key).await
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<Vec<u8>>> {
        (**self).lrange(key, start, stop).await
    }

    async fn lpop(&self, key: &str, count: usize) -> Result<Vec<Vec<u8>>> {
        (**self).lpop(key, count).await
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>> {
        (**self).zscore(key, member).await
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        (**self).zcard(key).await
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        range: ScoreRange,
        limit: usize,
    ) -> Result<Vec<(String, f64)>> {
        (**self).zrange_by_score(key, range, limit).await
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        (**self).smembers(key).await
    }

    async fn hmget(&self, key: &str, fields: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        (**self).hmget(key, fields).await
    }

    async fn exec(&self, batch: Batch) -> Result<()> {
        (**self).exec(batch).await
    }

    async fn compare_and_swap(&self, guards: &[Guard], batch: Batch) -> Result<bool> {
        (**self).compare_and_swap(guards, batch).await
    }
}
