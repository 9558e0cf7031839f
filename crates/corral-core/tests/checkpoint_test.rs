//! Integration tests for the checkpoint manager (C2): the prefix-complete
//! watermark scan, against a real Postgres instance.

use corral_core::error::CorralError;
use corral_core::queue::{CheckpointManager, QueueProvider};
use corral_core::config::QueueConfig;

use corral_test_utils::{create_test_db, drop_test_db};

#[tokio::test]
async fn current_fails_with_checkpoint_missing_before_any_advance() {
    let (pool, db_name) = create_test_db().await;
    let checkpoints = CheckpointManager::new(pool.clone());

    let err = checkpoints.current("device-render").await.unwrap_err();
    match err.downcast::<CorralError>() {
        Ok(CorralError::CheckpointMissing { queue_name }) => assert_eq!(queue_name, "device-render"),
        other => panic!("expected CheckpointMissing, got {other:?}"),
    }

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn advance_does_nothing_while_the_oldest_entry_is_incomplete() {
    let (pool, db_name) = create_test_db().await;
    let queue = QueueProvider::new(pool.clone(), QueueConfig::default());
    let checkpoints = CheckpointManager::new(pool.clone());

    let first = queue.enqueue("device-render", serde_json::json!({})).await.unwrap();
    let second = queue.enqueue("device-render", serde_json::json!({})).await.unwrap();

    // Complete the second entry but leave the first (oldest) outstanding.
    queue.claim("device-render", "w1").await.unwrap();
    let claimed_second = queue_db_claim_specific(&pool, "device-render", second.id).await;
    queue.ack(claimed_second).await.unwrap();

    let advanced = checkpoints.advance("device-render").await.unwrap();
    assert_eq!(advanced, None, "a slow straggler must block the watermark");

    let _ = first;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn advance_moves_the_watermark_through_a_completed_prefix() {
    let (pool, db_name) = create_test_db().await;
    let queue = QueueProvider::new(pool.clone(), QueueConfig::default());
    let checkpoints = CheckpointManager::new(pool.clone());

    let first = queue.enqueue("device-render", serde_json::json!({})).await.unwrap();
    let second = queue.enqueue("device-render", serde_json::json!({})).await.unwrap();

    let c1 = queue.claim("device-render", "w1").await.unwrap().unwrap();
    queue.ack(c1.id).await.unwrap();
    let c2 = queue.claim("device-render", "w1").await.unwrap().unwrap();
    queue.ack(c2.id).await.unwrap();

    let advanced = checkpoints.advance("device-render").await.unwrap();
    assert_eq!(advanced, Some(second.enqueued_at));

    let current = checkpoints.current("device-render").await.unwrap();
    assert_eq!(current, second.enqueued_at);

    let _ = first;
    drop_test_db(&db_name).await;
}

/// Claim entries until the requested one comes up; the queue only claims
/// the oldest ready entry, so reaching a specific later entry means
/// draining everything ahead of it first.
async fn queue_db_claim_specific(pool: &sqlx::PgPool, queue_name: &str, target: uuid::Uuid) -> uuid::Uuid {
    loop {
        let entry = corral_db::queries::queue::claim_next(pool, queue_name, "w-drain")
            .await
            .unwrap()
            .expect("target entry should still be claimable");
        if entry.id == target {
            return entry.id;
        }
    }
}
