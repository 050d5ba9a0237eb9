//! # sequeue
//!
//! Per-key ordered work queue built on a shared key-value store (Redis).
//!
//! Producers enqueue items under a caller-chosen id. Items with the same id
//! are delivered in enqueue order, only one consumer works an id at a time,
//! and a consumer that crashes mid-batch leaves a lease that expires and is
//! reclaimed, so its items are delivered again (at-least-once).
//!
//! ```ignore
//! use std::sync::Arc;
//! use sequeue::codec::Utf8Codec;
//! use sequeue::config::QueueConfig;
//! use sequeue::queue::SequentialWorkQueue;
//! use sequeue::store::InMemoryStore;
//!
//! let queue = SequentialWorkQueue::new(
//!     Arc::new(InMemoryStore::new()),
//!     Utf8Codec,
//!     QueueConfig::with_namespace("orders"),
//! );
//! queue.enqueue("order-7", &"a".to_string()).await?;
//! queue.prepare_next_work_item().await?;
//! let mut session = queue.dequeue(10).await?;
//! for _ in 0..session.items().len() {
//!     session.done_processed_work_item().await?;
//! }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod lock;
pub mod queue;
pub mod store;
pub mod telemetry;
pub mod worker;
