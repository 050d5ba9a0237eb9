//! Worker loop: schedules ids, dequeues batches, dispatches items to a
//! handler, and sweeps zombie leases on a timer.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::codec::Codec;
use crate::error::Result;
use crate::queue::{DequeueSession, SequentialWorkQueue};
use crate::store::KeyStore;

/// Processes one item. An error stops the rest of the batch; items
/// acknowledged before it are committed, the failed one is redelivered.
#[async_trait]
pub trait ItemHandler<T: Send + 'static>: Send + Sync {
    async fn handle(&self, id: String, item: T) -> anyhow::Result<()>;
}

#[async_trait]
impl<T, F, Fut> ItemHandler<T> for F
where
    T: Send + 'static,
    F: Fn(String, T) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, id: String, item: T) -> anyhow::Result<()> {
        (self)(id, item).await
    }
}

/// Configuration for the worker loop.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum items per dequeue.
    pub batch_size: usize,
    /// Sleep between scheduling passes when idle.
    pub poll_interval: Duration,
    /// Period of the background zombie sweep.
    pub harvest_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            poll_interval: Duration::from_millis(500),
            harvest_interval: Duration::from_secs(60),
        }
    }
}

pub struct Worker<S: KeyStore + ?Sized, T, C: Codec<T>> {
    worker_id: Uuid,
    queue: SequentialWorkQueue<S, T, C>,
    config: WorkerConfig,
    shutdown: Arc<Notify>,
    processed: Arc<AtomicU64>,
}

impl<S: KeyStore + ?Sized, T, C: Codec<T>> Clone for Worker<S, T, C> {
    fn clone(&self) -> Self {
        Self {
            worker_id: self.worker_id,
            queue: self.queue.clone(),
            config: self.config.clone(),
            shutdown: Arc::clone(&self.shutdown),
            processed: Arc::clone(&self.processed),
        }
    }
}

impl<S, T, C> Worker<S, T, C>
where
    S: KeyStore + ?Sized,
    T: Clone + Send + Sync + 'static,
    C: Codec<T>,
{
    pub fn new(queue: SequentialWorkQueue<S, T, C>, config: WorkerConfig) -> Self {
        Self {
            worker_id: Uuid::new_v4(),
            queue,
            config,
            shutdown: Arc::new(Notify::new()),
            processed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Identifies this worker (and its clones) in logs.
    pub fn worker_id(&self) -> Uuid {
        self.worker_id
    }

    /// Signal the loop to stop after its current pass.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Items acknowledged by this worker (and its clones) so far.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Run until [`shutdown`](Self::shutdown).
    pub async fn run<H: ItemHandler<T>>(&self, handler: H) -> Result<()> {
        let mut harvest = tokio::time::interval(self.config.harvest_interval);
        harvest.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            worker_id = %self.worker_id,
            queue = self.queue.keys().namespace(),
            batch_size = self.config.batch_size,
            "worker started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("worker shutting down");
                    return Ok(());
                }
                _ = harvest.tick() => {
                    if let Err(e) = self.queue.harvest_zombies().await {
                        error!("zombie sweep failed: {e}");
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }

            if let Err(e) = self.drain(&handler).await {
                error!("worker pass failed: {e}");
            }
        }
    }

    /// Claim and work ids until nothing is eligible or pending, or a handler
    /// fails (the failed id is retried on a later pass).
    pub async fn drain<H: ItemHandler<T>>(&self, handler: &H) -> Result<()> {
        loop {
            let claimed = self.queue.prepare_next_work_item().await?;
            let session = self.queue.dequeue(self.config.batch_size).await?;
            if session.id().is_none() && !claimed {
                return Ok(());
            }
            if session.is_empty() {
                continue;
            }
            let span = info_span!(
                "worker.batch",
                worker_id = %self.worker_id,
                id = session.id().unwrap_or_default()
            );
            if !self.work_session(session, handler).instrument(span).await? {
                return Ok(());
            }
        }
    }

    async fn work_session<H: ItemHandler<T>>(
        &self,
        mut session: DequeueSession<S, T, C>,
        handler: &H,
    ) -> Result<bool> {
        let id = session.id().unwrap_or_default().to_string();
        for index in 0..session.items().len() {
            let item = session.items()[index].clone();
            match handler.handle(id.clone(), item).await {
                Ok(()) => {
                    session.done_processed_work_item().await?;
                    self.processed.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    warn!(id, index, error = %e, "handler failed, committing processed prefix");
                    session.pop_and_unlock(None).await?;
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}
