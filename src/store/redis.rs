//! Redis-backed [`KeyStore`] over a deadpool connection pool.
//!
//! Batches become MULTI/EXEC pipelines. Guarded batches WATCH the guard keys
//! on a dedicated pooled connection, check them, then run the pipeline; a nil
//! EXEC reply means a watched key changed and the batch was discarded.

use async_trait::async_trait;
use deadpool_redis::{Config as PoolSettings, Pool, PoolConfig, Runtime};
use redis::AsyncCommands;
use tracing::{debug, warn};

use super::{Batch, Guard, KeyStore, Op, ScoreRange};
use crate::error::{Error, Result};

/// Redis store handle. Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
}

impl RedisStore {
    /// Build a pool for `url` (e.g. "redis://127.0.0.1:6379") with at most
    /// `pool_size` connections. Connections are opened lazily.
    pub fn connect(url: &str, pool_size: usize) -> Result<Self> {
        let settings = PoolSettings {
            pool: Some(PoolConfig::new(pool_size)),
            ..PoolSettings::from_url(url)
        };
        let pool = settings
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| Error::Config(format!("cannot build redis pool: {e}")))?;
        Ok(Self { pool })
    }

    /// Round-trip a PING.
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    /// Clear a WATCH before the connection goes back to the pool. A
    /// connection that cannot be reset is detached and dropped instead.
    async fn unwatch(mut conn: deadpool_redis::Connection) {
        let reset: redis::RedisResult<()> = redis::cmd("UNWATCH").query_async(&mut conn).await;
        if let Err(e) = reset {
            warn!(error = %e, "UNWATCH failed, dropping connection");
            drop(deadpool_redis::Connection::take(conn));
        }
    }

    async fn guard_holds(conn: &mut deadpool_redis::Connection, guard: &Guard) -> Result<bool> {
        Ok(match guard {
            Guard::Value { key, expected } => {
                let current: Option<String> = conn.get(key).await?;
                current == *expected
            }
            Guard::ListLen { key, expected } => {
                let len: u64 = conn.llen(key).await?;
                len == *expected
            }
        })
    }
}

/// Redis range bound syntax; infinities must be spelled out.
fn score_arg(score: f64) -> String {
    if score == f64::NEG_INFINITY {
        "-inf".to_string()
    } else if score == f64::INFINITY {
        "+inf".to_string()
    } else {
        score.to_string()
    }
}

fn pipeline(batch: &Batch) -> redis::Pipeline {
    let mut pipe = redis::pipe();
    pipe.atomic();
    for op in batch.ops() {
        match op {
            Op::RPush { key, value } => pipe.rpush(key, value.as_slice()).ignore(),
            Op::LTrim { key, start, stop } => pipe
                .ltrim(key, *start as isize, *stop as isize)
                .ignore(),
            Op::LSet { key, index, value } => {
                pipe.lset(key, *index as isize, value.as_slice()).ignore()
            }
            Op::ZAdd { key, member, score } => pipe.zadd(key, member, *score).ignore(),
            Op::ZIncrBy { key, member, delta } => pipe.zincr(key, member, *delta).ignore(),
            Op::ZRem { key, member } => pipe.zrem(key, member).ignore(),
            Op::SAdd { key, member } => pipe.sadd(key, member).ignore(),
            Op::SRem { key, member } => pipe.srem(key, member).ignore(),
            Op::Set { key, value } => pipe.set(key, value).ignore(),
            Op::Del { key } => pipe.del(key).ignore(),
            Op::HSet { key, field, value } => pipe.hset(key, field, value.as_slice()).ignore(),
            Op::HDel { key, field } => pipe.hdel(key, field).ignore(),
        };
    }
    pipe
}

#[async_trait]
impl KeyStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.pool.get().await?;
        Ok(conn.get(key).await?)
    }

    async fn set_nx(&self, key: &str, value: &str) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        Ok(conn.set_nx(key, value).await?)
    }

    async fn llen(&self, key: &str) -> Result<u64> {
        let mut conn = self.pool.get().await?;
        Ok(conn.llen(key).await?)
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<Vec<u8>>> {
        let mut conn = self.pool.get().await?;
        Ok(conn.lrange(key, start as isize, stop as isize).await?)
    }

    async fn lpop(&self, key: &str, count: usize) -> Result<Vec<Vec<u8>>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.pool.get().await?;
        let popped: Option<Vec<Vec<u8>>> = redis::cmd("LPOP")
            .arg(key)
            .arg(count)
            .query_async(&mut conn)
            .await?;
        Ok(popped.unwrap_or_default())
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>> {
        let mut conn = self.pool.get().await?;
        Ok(conn.zscore(key, member).await?)
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        let mut conn = self.pool.get().await?;
        Ok(conn.zcard(key).await?)
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        range: ScoreRange,
        limit: usize,
    ) -> Result<Vec<(String, f64)>> {
        let mut conn = self.pool.get().await?;
        let members: Vec<(String, f64)> = redis::cmd("ZRANGEBYSCORE")
            .arg(key)
            .arg(score_arg(range.min))
            .arg(score_arg(range.max))
            .arg("WITHSCORES")
            .arg("LIMIT")
            .arg(0)
            .arg(limit)
            .query_async(&mut conn)
            .await?;
        Ok(members)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.pool.get().await?;
        Ok(conn.smembers(key).await?)
    }

    async fn hmget(&self, key: &str, fields: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        if fields.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.pool.get().await?;
        let values: Vec<Option<Vec<u8>>> = redis::cmd("HMGET")
            .arg(key)
            .arg(fields)
            .query_async(&mut conn)
            .await?;
        Ok(values)
    }

    async fn exec(&self, batch: Batch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut conn = self.pool.get().await?;
        // Nil means EXEC was aborted and nothing was applied.
        let reply: Option<redis::Value> = pipeline(&batch).query_async(&mut conn).await?;
        if reply.is_none() {
            return Err(Error::StoreUnavailable(
                "transaction aborted by a watched key".to_string(),
            ));
        }
        Ok(())
    }

    async fn compare_and_swap(&self, guards: &[Guard], batch: Batch) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let keys: Vec<&str> = guards.iter().map(Guard::key).collect();
        if !keys.is_empty() {
            let _: () = redis::cmd("WATCH").arg(&keys).query_async(&mut conn).await?;
        }

        for guard in guards {
            match Self::guard_holds(&mut conn, guard).await {
                Ok(true) => {}
                Ok(false) => {
                    Self::unwatch(conn).await;
                    debug!(key = guard.key(), "guard no longer holds");
                    return Ok(false);
                }
                Err(e) => {
                    Self::unwatch(conn).await;
                    return Err(e);
                }
            }
        }

        // EXEC replies nil when a watched key changed.
        let reply: Option<redis::Value> = pipeline(&batch).query_async(&mut conn).await?;
        Ok(reply.is_some())
    }
}
