//! Work queues built on [`KeyStore`](crate::store::KeyStore) primitives.
//!
//! - [`SequentialWorkQueue`] keeps items with the same id in order and lets
//!   only one consumer work an id at a time, with crash recovery.
//! - [`SimpleWorkQueue`] is a plain FIFO with no per-id ordering.
//! - [`ChronologicalWorkQueue`] hands out items by timestamp range.

pub mod chronological;
pub mod keys;
pub mod sequential;
pub mod session;
pub mod simple;

pub use chronological::ChronologicalWorkQueue;
pub use keys::QueueKeys;
pub use sequential::{
    BacklogEntry, CLAIMED_SCORE, Lease, QueueStats, SequentialWorkQueue, is_claimed_score,
};
pub use session::DequeueSession;
pub use simple::SimpleWorkQueue;
