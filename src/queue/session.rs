//! Caller-facing handle over one dequeued batch.

use std::time::Instant;

use tracing::{Span, debug, warn};

use super::sequential::{Lease, SequentialWorkQueue};
use crate::codec::Codec;
use crate::error::{Error, Result};
use crate::store::KeyStore;
use crate::telemetry::{metrics, work};

/// Items returned by one [`SequentialWorkQueue::dequeue`] call and the lease
/// that covers them.
///
/// Acknowledge items in order with
/// [`done_processed_work_item`](Self::done_processed_work_item); the last
/// acknowledgment pops the whole batch and releases the lease. On error
/// paths call [`pop_and_unlock`](Self::pop_and_unlock) to commit only what
/// was processed. Dropping a session without committing leaves the lease to
/// expire, after which the unacknowledged items are delivered again.
pub struct DequeueSession<S: KeyStore + ?Sized, T, C: Codec<T>> {
    queue: SequentialWorkQueue<S, T, C>,
    id: Option<String>,
    items: Vec<T>,
    lease: Option<Lease>,
    processed: usize,
    committed: bool,
    started: Instant,
    span: Span,
}

impl<S: KeyStore + ?Sized, T, C: Codec<T>> DequeueSession<S, T, C> {
    pub(crate) fn new(queue: SequentialWorkQueue<S, T, C>, lease: Lease, items: Vec<T>) -> Self {
        let span = work::start_session_span(queue.keys().namespace(), &lease.id, items.len());
        work::record_state_transition(&span, "claimed", "leased");
        Self {
            queue,
            id: Some(lease.id.clone()),
            items,
            lease: Some(lease),
            processed: 0,
            committed: false,
            started: Instant::now(),
            span,
        }
    }

    /// A session holding nothing. `id` is set when an id was taken from
    /// `pending` but had no items left.
    pub(crate) fn empty(queue: SequentialWorkQueue<S, T, C>, id: Option<String>) -> Self {
        Self {
            queue,
            id,
            items: Vec::new(),
            lease: None,
            processed: 0,
            committed: true,
            started: Instant::now(),
            span: Span::none(),
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn lease(&self) -> Option<&Lease> {
        self.lease.as_ref()
    }

    /// How many items have been acknowledged so far.
    pub fn processed_count(&self) -> usize {
        self.processed
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Acknowledge the next item. The final acknowledgment commits the
    /// batch. Extra calls are no-ops.
    ///
    /// If the final commit fails the item stays unacknowledged, so calling
    /// again retries the commit.
    pub async fn done_processed_work_item(&mut self) -> Result<()> {
        if self.committed || self.processed >= self.items.len() {
            return Ok(());
        }
        let acked = self.processed + 1;
        if acked == self.items.len() {
            self.commit(acked).await?;
        }
        self.processed = acked;
        Ok(())
    }

    /// Replace the next unacknowledged item, both here and in the store.
    ///
    /// Returns `false` without changing anything if the lease was reclaimed
    /// in the meantime.
    pub async fn update_next_unprocessed(&mut self, item: T) -> Result<bool> {
        let (Some(lease), false) = (self.lease.as_ref(), self.committed) else {
            return Err(Error::Other("session is already committed".to_string()));
        };
        let index = self.processed;
        if index >= self.items.len() {
            return Err(Error::Other("session has no unprocessed item".to_string()));
        }
        if !self.queue.update_leased(lease, index, &item).await? {
            return Ok(false);
        }
        self.items[index] = item;
        Ok(true)
    }

    /// Commit early: pop `processed` items (default: the acknowledged count,
    /// clamped to the batch size) and release the lease.
    ///
    /// Returns whether the commit applied; `false` when the session was
    /// already committed, held nothing, or its lease had been reclaimed.
    pub async fn pop_and_unlock(&mut self, processed: Option<usize>) -> Result<bool> {
        if self.committed {
            return Ok(false);
        }
        let count = processed.unwrap_or(self.processed).min(self.items.len());
        self.commit(count).await
    }

    async fn commit(&mut self, count: usize) -> Result<bool> {
        let Some(lease) = &self.lease else {
            self.committed = true;
            return Ok(false);
        };
        let applied = self.queue.pop_and_unlock(lease, count).await?;
        self.committed = true;

        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        metrics::session_duration_ms().record(elapsed_ms, &[]);
        if applied {
            work::record_state_transition(&self.span, "leased", "unlocked");
            debug!(id = %lease.id, popped = count, "session committed");
        } else {
            work::record_state_transition(&self.span, "leased", "lost");
            warn!(id = %lease.id, "lease was reclaimed before commit; items will be redelivered");
        }
        Ok(applied)
    }
}

impl<S: KeyStore + ?Sized, T, C: Codec<T>> Drop for DequeueSession<S, T, C> {
    fn drop(&mut self) {
        if !self.committed
            && let Some(lease) = &self.lease
        {
            warn!(
                id = %lease.id,
                expires_at = lease.expires_at,
                processed = self.processed,
                "session dropped without commit, id stays leased until expiry"
            );
        }
    }
}
