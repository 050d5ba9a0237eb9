//! Batched write requests and optimistic guards.

/// A single write inside a [`Batch`].
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    RPush { key: String, value: Vec<u8> },
    /// Keep only elements `start..=stop`; an empty result deletes the list.
    LTrim { key: String, start: i64, stop: i64 },
    LSet { key: String, index: i64, value: Vec<u8> },
    ZAdd { key: String, member: String, score: f64 },
    ZIncrBy { key: String, member: String, delta: f64 },
    ZRem { key: String, member: String },
    SAdd { key: String, member: String },
    SRem { key: String, member: String },
    Set { key: String, value: String },
    Del { key: String },
    HSet { key: String, field: String, value: Vec<u8> },
    HDel { key: String, field: String },
}

/// Ordered list of writes submitted to the store as one unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    ops: Vec<Op>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn push(mut self, op: Op) -> Self {
        self.ops.push(op);
        self
    }

    pub fn rpush(self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.push(Op::RPush {
            key: key.into(),
            value: value.into(),
        })
    }

    pub fn ltrim(self, key: impl Into<String>, start: i64, stop: i64) -> Self {
        self.push(Op::LTrim {
            key: key.into(),
            start,
            stop,
        })
    }

    pub fn lset(self, key: impl Into<String>, index: i64, value: impl Into<Vec<u8>>) -> Self {
        self.push(Op::LSet {
            key: key.into(),
            index,
            value: value.into(),
        })
    }

    pub fn zadd(self, key: impl Into<String>, member: impl Into<String>, score: f64) -> Self {
        self.push(Op::ZAdd {
            key: key.into(),
            member: member.into(),
            score,
        })
    }

    pub fn zincr_by(self, key: impl Into<String>, member: impl Into<String>, delta: f64) -> Self {
        self.push(Op::ZIncrBy {
            key: key.into(),
            member: member.into(),
            delta,
        })
    }

    pub fn zrem(self, key: impl Into<String>, member: impl Into<String>) -> Self {
        self.push(Op::ZRem {
            key: key.into(),
            member: member.into(),
        })
    }

    pub fn sadd(self, key: impl Into<String>, member: impl Into<String>) -> Self {
        self.push(Op::SAdd {
            key: key.into(),
            member: member.into(),
        })
    }

    pub fn srem(self, key: impl Into<String>, member: impl Into<String>) -> Self {
        self.push(Op::SRem {
            key: key.into(),
            member: member.into(),
        })
    }

    pub fn set(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(Op::Set {
            key: key.into(),
            value: value.into(),
        })
    }

    pub fn del(self, key: impl Into<String>) -> Self {
        self.push(Op::Del { key: key.into() })
    }

    pub fn hset(
        self,
        key: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        self.push(Op::HSet {
            key: key.into(),
            field: field.into(),
            value: value.into(),
        })
    }

    pub fn hdel(self, key: impl Into<String>, field: impl Into<String>) -> Self {
        self.push(Op::HDel {
            key: key.into(),
            field: field.into(),
        })
    }
}

/// Precondition checked (and watched) before a guarded batch commits.
#[derive(Debug, Clone, PartialEq)]
pub enum Guard {
    /// String key must hold exactly `expected` (`None` = absent).
    Value { key: String, expected: Option<String> },
    /// List must have exactly `expected` elements.
    ListLen { key: String, expected: u64 },
}

impl Guard {
    pub fn value(key: impl Into<String>, expected: Option<String>) -> Self {
        Guard::Value {
            key: key.into(),
            expected,
        }
    }

    pub fn list_len(key: impl Into<String>, expected: u64) -> Self {
        Guard::ListLen {
            key: key.into(),
            expected,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Guard::Value { key, .. } | Guard::ListLen { key, .. } => key,
        }
    }
}
