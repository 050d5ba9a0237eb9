use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use sequeue::codec::{JsonCodec, Utf8Codec};
use sequeue::queue::{ChronologicalWorkQueue, SimpleWorkQueue};
use sequeue::store::InMemoryStore;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Reminder {
    user: String,
    text: String,
}

fn reminder(user: &str, text: &str) -> Reminder {
    Reminder {
        user: user.to_string(),
        text: text.to_string(),
    }
}

#[tokio::test]
async fn simple_queue_is_fifo_in_batches() {
    let queue = SimpleWorkQueue::new(Arc::new(InMemoryStore::new()), Utf8Codec, "test");
    assert!(queue.is_empty().await.unwrap());
    for item in ["1", "2", "3"] {
        queue.enqueue(&item.to_string()).await.unwrap();
    }
    assert_eq!(queue.len().await.unwrap(), 3);

    assert_eq!(queue.dequeue(2).await.unwrap(), vec!["1", "2"]);
    assert_eq!(queue.dequeue(2).await.unwrap(), vec!["3"]);
    assert!(queue.dequeue(2).await.unwrap().is_empty());
    assert!(queue.is_empty().await.unwrap());
}

#[tokio::test]
async fn chronological_queue_returns_window_oldest_first() {
    let queue = ChronologicalWorkQueue::new(
        Arc::new(InMemoryStore::new()),
        JsonCodec::<Reminder>::new(),
        "test",
    );
    let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
    queue
        .enqueue("late", &reminder("bo", "lunch"), t0 + Duration::hours(3))
        .await
        .unwrap();
    queue
        .enqueue("first", &reminder("al", "standup"), t0)
        .await
        .unwrap();
    queue
        .enqueue("second", &reminder("al", "review"), t0 + Duration::minutes(30))
        .await
        .unwrap();
    assert_eq!(queue.len().await.unwrap(), 3);

    let due = queue
        .dequeue(t0, t0 + Duration::hours(1), 10)
        .await
        .unwrap();
    assert_eq!(
        due,
        vec![
            ("first".to_string(), reminder("al", "standup")),
            ("second".to_string(), reminder("al", "review")),
        ]
    );
    assert_eq!(queue.len().await.unwrap(), 1);
    assert!(queue
        .dequeue(t0, t0 + Duration::hours(1), 10)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn chronological_queue_respects_batch_limit_and_reschedule() {
    let queue = ChronologicalWorkQueue::new(Arc::new(InMemoryStore::new()), Utf8Codec, "test");
    let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
    queue.enqueue("a", &"a1".to_string(), t0).await.unwrap();
    queue
        .enqueue("b", &"b1".to_string(), t0 + Duration::seconds(1))
        .await
        .unwrap();
    // Re-enqueueing moves "a" after "b" and replaces its payload.
    queue
        .enqueue("a", &"a2".to_string(), t0 + Duration::seconds(2))
        .await
        .unwrap();
    assert_eq!(queue.len().await.unwrap(), 2);

    let window_end = t0 + Duration::minutes(1);
    assert_eq!(
        queue.dequeue(t0, window_end, 1).await.unwrap(),
        vec![("b".to_string(), "b1".to_string())]
    );
    assert_eq!(
        queue.dequeue(t0, window_end, 0).await.unwrap(),
        Vec::<(String, String)>::new()
    );
    assert_eq!(
        queue.dequeue(t0, window_end, 5).await.unwrap(),
        vec![("a".to_string(), "a2".to_string())]
    );
}
