//! Span helpers for dequeue sessions.

use tracing::Span;

/// Start a span covering one dequeue session.
///
/// `queue.state` is declared empty and filled by
/// [`record_state_transition`].
pub fn start_session_span(queue: &str, id: &str, batch: usize) -> Span {
    tracing::info_span!(
        "queue.session",
        "queue.name" = queue,
        "queue.item_id" = id,
        "queue.batch" = batch,
        "queue.state" = tracing::field::Empty,
    )
}

/// Record a lease state transition on `span`.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.record("queue.state", to);
    span.in_scope(|| {
        tracing::debug!(from = from, to = to, "state_transition");
    });
}
