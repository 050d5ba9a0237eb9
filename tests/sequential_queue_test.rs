use std::sync::Arc;
use std::time::Duration;

use sequeue::codec::Utf8Codec;
use sequeue::config::QueueConfig;
use sequeue::error::Error;
use sequeue::queue::{SequentialWorkQueue, is_claimed_score};
use sequeue::store::{Batch, InMemoryStore, KeyStore};

type Queue = SequentialWorkQueue<InMemoryStore, String, Utf8Codec>;

fn queue_with(config: QueueConfig) -> (Arc<InMemoryStore>, Queue) {
    let store = Arc::new(InMemoryStore::new());
    let queue = SequentialWorkQueue::new(Arc::clone(&store), Utf8Codec, config);
    (store, queue)
}

fn queue() -> (Arc<InMemoryStore>, Queue) {
    queue_with(QueueConfig::with_namespace("test"))
}

fn short_lease(ms: u64) -> QueueConfig {
    QueueConfig {
        lease_duration_ms: ms,
        ..QueueConfig::with_namespace("test")
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

async fn enqueue_all(queue: &Queue, id: &str, items: &[&str]) {
    for item in items {
        queue.enqueue(id, &item.to_string()).await.unwrap();
    }
}

#[tokio::test]
async fn items_for_one_id_come_back_in_enqueue_order() {
    let (_, queue) = queue();
    enqueue_all(&queue, "order-7", &["a", "b", "c"]).await;
    assert_eq!(queue.backlog_score("order-7").await.unwrap(), Some(-3.0));

    assert!(queue.prepare_next_work_item().await.unwrap());
    let mut session = queue.dequeue(10).await.unwrap();
    assert_eq!(session.id(), Some("order-7"));
    assert_eq!(session.items().to_vec(), strings(&["a", "b", "c"]));

    for _ in 0..3 {
        session.done_processed_work_item().await.unwrap();
    }
    assert!(session.is_committed());
    assert_eq!(queue.item_count("order-7").await.unwrap(), 0);
    assert_eq!(queue.backlog_score("order-7").await.unwrap(), None);

    let stats = queue.stats().await.unwrap();
    assert!(stats.backlog.is_empty());
    assert!(stats.leased.is_empty());
    assert_eq!(stats.pending, 0);
}

#[tokio::test]
async fn crashed_consumer_items_are_redelivered_after_harvest() {
    let (_, queue) = queue_with(short_lease(50));
    enqueue_all(&queue, "order-7", &["a", "b"]).await;

    assert!(queue.prepare_next_work_item().await.unwrap());
    let mut session = queue.dequeue(10).await.unwrap();
    assert_eq!(session.items().to_vec(), strings(&["a", "b"]));
    session.done_processed_work_item().await.unwrap();
    // Consumer dies without committing.
    drop(session);

    assert!(queue.stats().await.unwrap().leased.contains(&"order-7".to_string()));
    assert!(!queue.prepare_next_work_item().await.unwrap());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(queue.harvest_zombies().await.unwrap());
    assert_eq!(queue.backlog_score("order-7").await.unwrap(), Some(-2.0));
    assert!(queue.stats().await.unwrap().leased.is_empty());

    assert!(queue.prepare_next_work_item().await.unwrap());
    let session = queue.dequeue(10).await.unwrap();
    assert_eq!(session.items().to_vec(), strings(&["a", "b"]));
}

#[tokio::test]
async fn harvest_ignores_live_leases() {
    let (_, queue) = queue();
    enqueue_all(&queue, "a", &["1"]).await;
    assert!(queue.prepare_next_work_item().await.unwrap());
    let _session = queue.dequeue(10).await.unwrap();

    assert!(!queue.harvest_zombies().await.unwrap());
    assert!(!queue.try_force_release_lock("a").await.unwrap());
    assert!(is_claimed_score(queue.backlog_score("a").await.unwrap().unwrap()));
}

#[tokio::test]
async fn partial_batch_leaves_remaining_items_backlogged() {
    let (_, queue) = queue();
    enqueue_all(&queue, "x", &["0", "1", "2", "3", "4"]).await;

    assert!(queue.prepare_next_work_item().await.unwrap());
    let mut session = queue.dequeue(2).await.unwrap();
    assert_eq!(session.items().to_vec(), strings(&["0", "1"]));
    session.done_processed_work_item().await.unwrap();
    session.done_processed_work_item().await.unwrap();
    assert!(session.is_committed());

    assert_eq!(queue.backlog_score("x").await.unwrap(), Some(-3.0));
    assert!(queue.prepare_next_work_item().await.unwrap());
    let session = queue.dequeue(10).await.unwrap();
    assert_eq!(session.items().to_vec(), strings(&["2", "3", "4"]));
}

#[tokio::test]
async fn most_backlogged_id_is_claimed_first() {
    let (_, queue) = queue();
    enqueue_all(&queue, "small", &["1"]).await;
    enqueue_all(&queue, "big", &["1", "2", "3"]).await;

    assert!(queue.prepare_next_work_item().await.unwrap());
    let session = queue.dequeue(10).await.unwrap();
    assert_eq!(session.id(), Some("big"));
}

#[tokio::test]
async fn claimed_id_is_not_claimed_again() {
    let (_, queue) = queue();
    enqueue_all(&queue, "a", &["1"]).await;

    assert!(queue.prepare_next_work_item().await.unwrap());
    assert!(!queue.prepare_next_work_item().await.unwrap());
    assert_eq!(queue.stats().await.unwrap().pending, 1);

    let first = queue.dequeue(10).await.unwrap();
    assert_eq!(first.id(), Some("a"));
    let second = queue.dequeue(10).await.unwrap();
    assert_eq!(second.id(), None);
    assert!(second.is_empty());
}

#[tokio::test]
async fn lease_excludes_a_second_consumer() {
    let config = QueueConfig {
        dequeue_lock_timeout_ms: 20,
        ..QueueConfig::with_namespace("test")
    };
    let (store, queue) = queue_with(config);
    enqueue_all(&queue, "a", &["1", "2"]).await;
    assert!(queue.prepare_next_work_item().await.unwrap());
    let mut holder = queue.dequeue(10).await.unwrap();

    // Force the id back onto pending as a misbehaving scheduler would.
    store
        .exec(Batch::new().rpush(queue.keys().pending(), b"a".to_vec()))
        .await
        .unwrap();
    let err = queue.dequeue(10).await.err().unwrap();
    assert!(matches!(err, Error::LockTimeout { .. }));

    // The holder's lease and claim are untouched.
    assert!(is_claimed_score(queue.backlog_score("a").await.unwrap().unwrap()));
    assert!(holder.pop_and_unlock(Some(2)).await.unwrap());
    assert_eq!(queue.item_count("a").await.unwrap(), 0);
}

#[tokio::test]
async fn enqueue_while_claimed_is_counted_after_commit() {
    let (_, queue) = queue();
    enqueue_all(&queue, "a", &["1"]).await;
    assert!(queue.prepare_next_work_item().await.unwrap());
    let mut session = queue.dequeue(10).await.unwrap();

    enqueue_all(&queue, "a", &["2"]).await;
    let score = queue.backlog_score("a").await.unwrap().unwrap();
    assert!(is_claimed_score(score));
    assert!(!queue.prepare_next_work_item().await.unwrap());

    session.done_processed_work_item().await.unwrap();
    assert_eq!(queue.backlog_score("a").await.unwrap(), Some(-1.0));

    assert!(queue.prepare_next_work_item().await.unwrap());
    let session = queue.dequeue(10).await.unwrap();
    assert_eq!(session.items().to_vec(), strings(&["2"]));
}

#[tokio::test]
async fn pop_and_unlock_commits_only_processed_items_once() {
    let (_, queue) = queue();
    enqueue_all(&queue, "a", &["1", "2", "3"]).await;
    assert!(queue.prepare_next_work_item().await.unwrap());
    let mut session = queue.dequeue(10).await.unwrap();

    session.done_processed_work_item().await.unwrap();
    assert_eq!(session.processed_count(), 1);
    assert!(session.pop_and_unlock(None).await.unwrap());
    assert!(!session.pop_and_unlock(None).await.unwrap());
    // Acks after commit are ignored.
    session.done_processed_work_item().await.unwrap();

    assert_eq!(queue.item_count("a").await.unwrap(), 2);
    assert_eq!(queue.backlog_score("a").await.unwrap(), Some(-2.0));
}

#[tokio::test]
async fn pop_and_unlock_clamps_count_to_batch() {
    let (_, queue) = queue();
    enqueue_all(&queue, "a", &["1", "2", "3"]).await;
    assert!(queue.prepare_next_work_item().await.unwrap());
    let mut session = queue.dequeue(2).await.unwrap();

    assert!(session.pop_and_unlock(Some(50)).await.unwrap());
    assert_eq!(queue.item_count("a").await.unwrap(), 1);
    assert_eq!(queue.backlog_score("a").await.unwrap(), Some(-1.0));
}

#[tokio::test]
async fn update_next_unprocessed_rewrites_stored_item() {
    let (_, queue) = queue();
    enqueue_all(&queue, "a", &["1", "2"]).await;
    assert!(queue.prepare_next_work_item().await.unwrap());
    let mut session = queue.dequeue(10).await.unwrap();

    session.done_processed_work_item().await.unwrap();
    assert!(
        session
            .update_next_unprocessed("2-partial".to_string())
            .await
            .unwrap()
    );
    assert_eq!(session.items()[1], "2-partial");
    assert!(session.pop_and_unlock(None).await.unwrap());
    assert!(session.update_next_unprocessed("late".to_string()).await.is_err());

    assert!(queue.prepare_next_work_item().await.unwrap());
    let session = queue.dequeue(10).await.unwrap();
    assert_eq!(session.items().to_vec(), strings(&["2-partial"]));
}

#[tokio::test]
async fn stale_session_cannot_commit_after_reclaim() {
    let (_, queue) = queue_with(short_lease(30));
    enqueue_all(&queue, "a", &["1"]).await;
    assert!(queue.prepare_next_work_item().await.unwrap());
    let mut session = queue.dequeue(10).await.unwrap();

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(queue.harvest_zombies().await.unwrap());

    assert!(!session.pop_and_unlock(Some(1)).await.unwrap());
    assert_eq!(queue.item_count("a").await.unwrap(), 1);
    assert_eq!(queue.backlog_score("a").await.unwrap(), Some(-1.0));
}

#[tokio::test]
async fn stale_session_cannot_update_items() {
    let (store, queue) = queue_with(short_lease(30));
    enqueue_all(&queue, "a", &["1", "2"]).await;
    assert!(queue.prepare_next_work_item().await.unwrap());
    let mut stale = queue.dequeue(10).await.unwrap();

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(queue.harvest_zombies().await.unwrap());
    assert!(queue.prepare_next_work_item().await.unwrap());
    let _owner = queue.dequeue(10).await.unwrap();

    assert!(
        !stale
            .update_next_unprocessed("overwritten".to_string())
            .await
            .unwrap()
    );
    assert_eq!(stale.items()[0], "1");
    assert_eq!(
        store.lrange(&queue.keys().items("a"), 0, -1).await.unwrap(),
        vec![b"1".to_vec(), b"2".to_vec()]
    );
}

#[tokio::test]
async fn unbounded_batch_size_returns_every_item() {
    let (_, queue) = queue();
    enqueue_all(&queue, "pair", &["a", "b"]).await;
    enqueue_all(&queue, "single", &["only"]).await;

    assert!(queue.prepare_next_work_item().await.unwrap());
    let mut session = queue.dequeue(usize::MAX).await.unwrap();
    assert_eq!(session.id(), Some("pair"));
    assert_eq!(session.items().to_vec(), strings(&["a", "b"]));
    assert!(session.pop_and_unlock(Some(2)).await.unwrap());

    assert!(queue.prepare_next_work_item().await.unwrap());
    let mut session = queue.dequeue(usize::MAX).await.unwrap();
    assert_eq!(session.id(), Some("single"));
    assert_eq!(session.items().to_vec(), strings(&["only"]));
    session.done_processed_work_item().await.unwrap();
    assert!(session.is_committed());
    assert_eq!(queue.item_count("single").await.unwrap(), 0);
    assert_eq!(queue.backlog_score("single").await.unwrap(), None);
}

#[tokio::test]
async fn claimed_id_without_items_is_released() {
    let (store, queue) = queue();
    enqueue_all(&queue, "a", &["1"]).await;
    assert!(queue.prepare_next_work_item().await.unwrap());
    store
        .exec(Batch::new().del(queue.keys().items("a")))
        .await
        .unwrap();

    let session = queue.dequeue(10).await.unwrap();
    assert_eq!(session.id(), Some("a"));
    assert!(session.is_empty());
    assert_eq!(queue.backlog_score("a").await.unwrap(), None);
    assert!(queue.stats().await.unwrap().leased.is_empty());
}

#[tokio::test]
async fn dequeue_with_nothing_pending_is_empty() {
    let (_, queue) = queue();
    let session = queue.dequeue(10).await.unwrap();
    assert_eq!(session.id(), None);
    assert!(session.is_empty());
    assert!(!queue.prepare_next_work_item().await.unwrap());
}

#[tokio::test]
async fn zero_batch_size_leaves_pending_untouched() {
    let (_, queue) = queue();
    enqueue_all(&queue, "a", &["1"]).await;
    assert!(queue.prepare_next_work_item().await.unwrap());

    let session = queue.dequeue(0).await.unwrap();
    assert!(session.is_empty());
    assert_eq!(queue.stats().await.unwrap().pending, 1);
}

#[tokio::test]
async fn enqueue_rejects_empty_id() {
    let (_, queue) = queue();
    assert!(queue.enqueue("", &"x".to_string()).await.is_err());
}

#[tokio::test]
async fn stats_report_backlog_and_claims() {
    let (_, queue) = queue();
    enqueue_all(&queue, "a", &["1", "2"]).await;
    enqueue_all(&queue, "b", &["1"]).await;
    assert!(queue.prepare_next_work_item().await.unwrap());

    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.namespace, "test");
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.leased, vec!["a".to_string()]);
    let b = stats.backlog.iter().find(|e| e.id == "b").unwrap();
    assert_eq!(b.backlog(), Some(1));
    let a = stats.backlog.iter().find(|e| e.id == "a").unwrap();
    assert!(a.claimed);
    assert_eq!(a.backlog(), None);
}

#[tokio::test]
async fn namespaces_are_isolated() {
    let store = Arc::new(InMemoryStore::new());
    let left: Queue = SequentialWorkQueue::new(
        Arc::clone(&store),
        Utf8Codec,
        QueueConfig::with_namespace("left"),
    );
    let right: Queue = SequentialWorkQueue::new(
        Arc::clone(&store),
        Utf8Codec,
        QueueConfig::with_namespace("right"),
    );
    enqueue_all(&left, "a", &["1"]).await;

    assert!(!right.prepare_next_work_item().await.unwrap());
    assert!(left.prepare_next_work_item().await.unwrap());
}

#[tokio::test]
async fn update_and_pop_edit_an_id_directly() {
    let (_, queue) = queue();
    enqueue_all(&queue, "a", &["1", "2", "3"]).await;

    queue.update("a", 2, &"3-fixed".to_string()).await.unwrap();
    assert!(queue.update("a", 5, &"x".to_string()).await.is_err());
    queue.pop("a", 0).await.unwrap();
    queue.pop("a", 1).await.unwrap();
    assert_eq!(queue.item_count("a").await.unwrap(), 2);

    assert!(queue.prepare_next_work_item().await.unwrap());
    let session = queue.dequeue(10).await.unwrap();
    assert_eq!(session.items().to_vec(), strings(&["2", "3-fixed"]));
}
