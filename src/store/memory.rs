//! In-memory implementation of [`KeyStore`] for tests and local runs.
//!
//! All state sits behind one mutex, so a batch or a guarded batch is applied
//! atomically with respect to every other call. Mirrors Redis semantics for
//! the subset of commands the queues use: empty lists, sets, sorted sets and
//! hashes disappear, and all data types share one key space.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Batch, Guard, KeyStore, Op, ScoreRange};
use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct State {
    strings: HashMap<String, String>,
    lists: HashMap<String, VecDeque<Vec<u8>>>,
    zsets: HashMap<String, HashMap<String, f64>>,
    sets: HashMap<String, BTreeSet<String>>,
    hashes: HashMap<String, HashMap<String, Vec<u8>>>,
}

impl State {
    fn llen(&self, key: &str) -> u64 {
        self.lists.get(key).map_or(0, |l| l.len() as u64)
    }

    fn guard_holds(&self, guard: &Guard) -> bool {
        match guard {
            Guard::Value { key, expected } => self.strings.get(key) == expected.as_ref(),
            Guard::ListLen { key, expected } => self.llen(key) == *expected,
        }
    }

    fn check(&self, op: &Op) -> Result<()> {
        if let Op::LSet { key, index, .. } = op {
            let len = self.llen(key) as i64;
            if len == 0 {
                return Err(Error::Other(format!("ERR no such key {key}")));
            }
            let idx = if *index < 0 { len + index } else { *index };
            if idx < 0 || idx >= len {
                return Err(Error::Other("ERR index out of range".to_string()));
            }
        }
        Ok(())
    }

    fn apply(&mut self, op: Op) {
        match op {
            Op::RPush { key, value } => self.lists.entry(key).or_default().push_back(value),
            Op::LTrim { key, start, stop } => {
                if let Some(list) = self.lists.get_mut(&key) {
                    let kept = match normalize_range(list.len(), start, stop) {
                        Some((s, e)) => list.drain(s..=e).collect(),
                        None => VecDeque::new(),
                    };
                    *list = kept;
                    if list.is_empty() {
                        self.lists.remove(&key);
                    }
                }
            }
            Op::LSet { key, index, value } => {
                if let Some(list) = self.lists.get_mut(&key) {
                    let len = list.len() as i64;
                    let idx = if index < 0 { len + index } else { index };
                    if let Some(slot) = list.get_mut(idx as usize) {
                        *slot = value;
                    }
                }
            }
            Op::ZAdd { key, member, score } => {
                self.zsets.entry(key).or_default().insert(member, score);
            }
            Op::ZIncrBy { key, member, delta } => {
                *self
                    .zsets
                    .entry(key)
                    .or_default()
                    .entry(member)
                    .or_insert(0.0) += delta;
            }
            Op::ZRem { key, member } => {
                if let Some(zset) = self.zsets.get_mut(&key) {
                    zset.remove(&member);
                    if zset.is_empty() {
                        self.zsets.remove(&key);
                    }
                }
            }
            Op::SAdd { key, member } => {
                self.sets.entry(key).or_default().insert(member);
            }
            Op::SRem { key, member } => {
                if let Some(set) = self.sets.get_mut(&key) {
                    set.remove(&member);
                    if set.is_empty() {
                        self.sets.remove(&key);
                    }
                }
            }
            Op::Set { key, value } => {
                self.strings.insert(key, value);
            }
            Op::Del { key } => {
                self.strings.remove(&key);
                self.lists.remove(&key);
                self.zsets.remove(&key);
                self.sets.remove(&key);
                self.hashes.remove(&key);
            }
            Op::HSet { key, field, value } => {
                self.hashes.entry(key).or_default().insert(field, value);
            }
            Op::HDel { key, field } => {
                if let Some(hash) = self.hashes.get_mut(&key) {
                    hash.remove(&field);
                    if hash.is_empty() {
                        self.hashes.remove(&key);
                    }
                }
            }
        }
    }

    fn apply_batch(&mut self, batch: Batch) -> Result<()> {
        for op in batch.ops() {
            self.check(op)?;
        }
        for op in batch.ops().iter().cloned() {
            self.apply(op);
        }
        Ok(())
    }
}

/// Resolve Redis-style inclusive `start..=stop` indexes against `len`.
fn normalize_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len || stop < 0 {
        return None;
    }
    Some((start as usize, stop as usize))
}

/// Deterministic, process-local store. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.state.lock().await.strings.get(key).cloned())
    }

    async fn set_nx(&self, key: &str, value: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.strings.contains_key(key) {
            return Ok(false);
        }
        state.strings.insert(key.to_string(), value.to_string());
        Ok(true)
    }

    async fn llen(&self, key: &str) -> Result<u64> {
        Ok(self.state.lock().await.llen(key))
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<Vec<u8>>> {
        let state = self.state.lock().await;
        let Some(list) = state.lists.get(key) else {
            return Ok(Vec::new());
        };
        Ok(match normalize_range(list.len(), start, stop) {
            Some((s, e)) => list.range(s..=e).cloned().collect(),
            None => Vec::new(),
        })
    }

    async fn lpop(&self, key: &str, count: usize) -> Result<Vec<Vec<u8>>> {
        let mut state = self.state.lock().await;
        let Some(list) = state.lists.get_mut(key) else {
            return Ok(Vec::new());
        };
        let take = count.min(list.len());
        let popped: Vec<_> = list.drain(..take).collect();
        if list.is_empty() {
            state.lists.remove(key);
        }
        Ok(popped)
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>> {
        let state = self.state.lock().await;
        Ok(state.zsets.get(key).and_then(|z| z.get(member).copied()))
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        let state = self.state.lock().await;
        Ok(state.zsets.get(key).map_or(0, |z| z.len() as u64))
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        range: ScoreRange,
        limit: usize,
    ) -> Result<Vec<(String, f64)>> {
        let state = self.state.lock().await;
        let Some(zset) = state.zsets.get(key) else {
            return Ok(Vec::new());
        };
        let mut members: Vec<(String, f64)> = zset
            .iter()
            .filter(|(_, score)| range.contains(**score))
            .map(|(m, s)| (m.clone(), *s))
            .collect();
        // Redis orders ties lexicographically by member.
        members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        members.truncate(limit);
        Ok(members)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let state = self.state.lock().await;
        Ok(state
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn hmget(&self, key: &str, fields: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        let state = self.state.lock().await;
        let hash = state.hashes.get(key);
        Ok(fields
            .iter()
            .map(|f| hash.and_then(|h| h.get(f).cloned()))
            .collect())
    }

    async fn exec(&self, batch: Batch) -> Result<()> {
        self.state.lock().await.apply_batch(batch)
    }

    async fn compare_and_swap(&self, guards: &[Guard], batch: Batch) -> Result<bool> {
        let mut state = self.state.lock().await;
        if !guards.iter().all(|g| state.guard_holds(g)) {
            return Ok(false);
        }
        state.apply_batch(batch)?;
        Ok(true)
    }
}
