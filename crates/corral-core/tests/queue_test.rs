//! Integration tests for the durable queue provider (C1): claim/ack,
//! retry-with-backoff, dead-lettering, and timeout reclamation, all against
//! a real Postgres instance via `corral-test-utils`.

use corral_db::models::QueueEntryStatus;
use corral_db::queries::queue as queue_db;

use corral_core::config::QueueConfig;
use corral_core::queue::{FailureOutcome, QueueProvider};

use corral_test_utils::{create_test_db, drop_test_db};

fn one_retry_config() -> QueueConfig {
    QueueConfig {
        base_delay_ms: 1,
        max_retries: 1,
        max_delay_ms: 10,
        jitter_factor: 0.0,
        pending_timeout_secs: 30,
    }
}

#[tokio::test]
async fn claim_then_ack_completes_the_entry() {
    let (pool, db_name) = create_test_db().await;
    let queue = QueueProvider::new(pool.clone(), QueueConfig::default());

    let entry = queue.enqueue("device-render", serde_json::json!({ "deviceId": "x" })).await.unwrap();
    let claimed = queue.claim("device-render", "worker-1").await.unwrap().expect("should claim the ready entry");
    assert_eq!(claimed.id, entry.id);
    assert_eq!(claimed.status, QueueEntryStatus::Delivered);

    queue.ack(entry.id).await.unwrap();

    let row = queue_db::get_entry(&pool, entry.id).await.unwrap().unwrap();
    assert_eq!(row.status, QueueEntryStatus::Completed);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn max_retries_one_allows_exactly_one_retry_before_dead_lettering() {
    let (pool, db_name) = create_test_db().await;
    let queue = QueueProvider::new(pool.clone(), one_retry_config());

    let entry = queue.enqueue("device-render", serde_json::json!({})).await.unwrap();
    let claimed = queue.claim("device-render", "worker-1").await.unwrap().unwrap();

    // First failure (attempt 0): should retry, not dead-letter.
    let outcome = queue.fail(&claimed, "boom").await.unwrap();
    assert_eq!(outcome, FailureOutcome::Retried);
    let row = queue_db::get_entry(&pool, entry.id).await.unwrap().unwrap();
    assert_eq!(row.status, QueueEntryStatus::Ready);
    assert_eq!(row.attempt, 1);

    // Second failure (attempt 1 == max_retries): dead-lettered.
    let reclaimed = queue.claim("device-render", "worker-1").await.unwrap().unwrap();
    let outcome = queue.fail(&reclaimed, "boom again").await.unwrap();
    assert_eq!(outcome, FailureOutcome::Dead);
    let row = queue_db::get_entry(&pool, entry.id).await.unwrap().unwrap();
    assert_eq!(row.status, QueueEntryStatus::Dead);

    let failed = queue.list_failed("device-render").await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].entry_id, entry.id);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn fail_on_an_already_acked_entry_is_a_no_op() {
    let (pool, db_name) = create_test_db().await;
    let queue = QueueProvider::new(pool.clone(), QueueConfig::default());

    let entry = queue.enqueue("device-render", serde_json::json!({})).await.unwrap();
    let claimed = queue.claim("device-render", "worker-1").await.unwrap().unwrap();
    queue.ack(entry.id).await.unwrap();

    // A stale snapshot of the claimed entry reports failure after the ack
    // already completed it -- must not resurrect the entry.
    let outcome = queue.fail(&claimed, "too late").await.unwrap();
    assert_eq!(outcome, FailureOutcome::AlreadyResolved);

    let row = queue_db::get_entry(&pool, entry.id).await.unwrap().unwrap();
    assert_eq!(row.status, QueueEntryStatus::Completed);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn reclaim_timed_out_skips_entries_resolved_since_the_snapshot() {
    let (pool, db_name) = create_test_db().await;
    let queue = QueueProvider::new(pool.clone(), QueueConfig { pending_timeout_secs: 0, ..QueueConfig::default() });

    let entry = queue.enqueue("device-render", serde_json::json!({})).await.unwrap();
    queue.claim("device-render", "worker-1").await.unwrap().unwrap();

    // The entry is immediately "timed out" (timeout is 0s), but it's also
    // already been acked by the time the reclaim loop gets to it.
    queue.ack(entry.id).await.unwrap();

    let reclaimed = queue.reclaim_timed_out("device-render").await.unwrap();
    assert_eq!(reclaimed, 0, "an already-acked entry must not be counted as reclaimed");

    let row = queue_db::get_entry(&pool, entry.id).await.unwrap().unwrap();
    assert_eq!(row.status, QueueEntryStatus::Completed);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn reclaim_timed_out_requeues_a_genuinely_stuck_entry() {
    let (pool, db_name) = create_test_db().await;
    let queue = QueueProvider::new(pool.clone(), QueueConfig { pending_timeout_secs: 0, ..QueueConfig::default() });

    let entry = queue.enqueue("device-render", serde_json::json!({})).await.unwrap();
    queue.claim("device-render", "worker-1").await.unwrap().unwrap();

    let reclaimed = queue.reclaim_timed_out("device-render").await.unwrap();
    assert_eq!(reclaimed, 1);

    let row = queue_db::get_entry(&pool, entry.id).await.unwrap().unwrap();
    assert_eq!(row.status, QueueEntryStatus::Ready);
    assert_eq!(row.attempt, 1);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn revive_dead_letters_resets_attempt_and_clears_quarantine() {
    let (pool, db_name) = create_test_db().await;
    let queue = QueueProvider::new(pool.clone(), one_retry_config());

    let entry = queue.enqueue("device-render", serde_json::json!({})).await.unwrap();
    let claimed = queue.claim("device-render", "worker-1").await.unwrap().unwrap();
    queue.fail(&claimed, "dead on arrival").await.unwrap();

    let row = queue_db::get_entry(&pool, entry.id).await.unwrap().unwrap();
    assert_eq!(row.status, QueueEntryStatus::Dead);

    let revived = queue.revive_dead_letters("device-render").await.unwrap();
    assert_eq!(revived, 1);

    let row = queue_db::get_entry(&pool, entry.id).await.unwrap().unwrap();
    assert_eq!(row.status, QueueEntryStatus::Ready);
    assert_eq!(row.attempt, 0);
    assert!(queue.list_failed("device-render").await.unwrap().is_empty());

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn depth_reports_per_status_counts() {
    let (pool, db_name) = create_test_db().await;
    let queue = QueueProvider::new(pool.clone(), QueueConfig::default());

    queue.enqueue("device-render", serde_json::json!({})).await.unwrap();
    queue.enqueue("device-render", serde_json::json!({})).await.unwrap();
    queue.claim("device-render", "worker-1").await.unwrap();

    let depth = queue.depth("device-render").await.unwrap();
    let ready = depth.iter().find(|(status, _)| status == "ready").map(|(_, c)| *c).unwrap_or(0);
    let delivered = depth.iter().find(|(status, _)| status == "delivered").map(|(_, c)| *c).unwrap_or(0);
    assert_eq!(ready, 1);
    assert_eq!(delivered, 1);

    drop_test_db(&db_name).await;
}
