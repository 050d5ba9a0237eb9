//! Metric instrument factories.
//!
//! Instruments come from the `"sequeue"` meter on the globally registered
//! `MeterProvider`; without one they are no-ops.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("sequeue")
}

/// Counter: queue operations.
/// Labels: `queue`, `operation` ("enqueue" | "claim" | "dequeue" | "update" | "pop" | "unlock").
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("sequeue.queue.operations")
        .with_description("Number of queue operations")
        .build()
}

/// Counter: lock acquisition outcomes.
/// Labels: `result` ("acquired" | "taken_over" | "timeout").
pub fn lock_acquisitions() -> Counter<u64> {
    meter()
        .u64_counter("sequeue.lock.acquisitions")
        .with_description("Lock acquisition attempts by outcome")
        .build()
}

/// Counter: ids reclaimed from stale leases.
/// Labels: `queue`.
pub fn zombies_reclaimed() -> Counter<u64> {
    meter()
        .u64_counter("sequeue.zombies.reclaimed")
        .with_description("Ids reclaimed after their lease went stale")
        .build()
}

/// Histogram: time from dequeue to commit.
pub fn session_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("sequeue.session.duration_ms")
        .with_description("Dequeue session lifetime in milliseconds")
        .with_unit("ms")
        .build()
}
