//! Error types for sequeue.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A lock or lease could not be obtained before the acquisition timeout.
    #[error("timed out acquiring lock {key}")]
    LockTimeout { key: String },

    /// Transport, pool, or command failure talking to the store.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// An optimistic transaction lost to a concurrent writer.
    #[error("race lost on {key}")]
    RaceLost { key: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    /// A lock or lease key holds something other than an epoch.
    #[error("corrupted value in {key}: {reason}")]
    CorruptedValue { key: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the caller can simply try again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::LockTimeout { .. } | Error::RaceLost { .. })
    }
}

impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Error::StoreUnavailable(e.to_string())
    }
}

impl From<deadpool_redis::PoolError> for Error {
    fn from(e: deadpool_redis::PoolError) -> Self {
        Error::StoreUnavailable(format!("pool: {e}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
