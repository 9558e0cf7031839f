//! Integration tests for the repository poller (C8): accessibility
//! transitions and the `Accessible` condition, against a real Postgres
//! instance. Probes shell out to the real `git` binary against local
//! filesystem repositories, so no network access is required.

use corral_db::models::{Condition, ConditionStatus, RepositoryKind};
use corral_db::queries::repositories as repo_db;
use uuid::Uuid;

use corral_core::config::QueueConfig;
use corral_core::queue::QueueProvider;
use corral_core::repo::{poll_repository, ProbeOutcome};

use corral_test_utils::{create_test_db, drop_test_db};

fn accessible_condition(conditions: &serde_json::Value) -> Option<Condition> {
    let parsed: Vec<Condition> = serde_json::from_value(conditions.clone()).unwrap_or_default();
    parsed.into_iter().find(|c| c.kind == "Accessible")
}

async fn init_bare_repo() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let status = tokio::process::Command::new("git")
        .args(["init", "--bare", "--quiet"])
        .arg(dir.path())
        .status()
        .await
        .expect("git should be available");
    assert!(status.success());
    dir
}

#[tokio::test]
async fn polling_an_unreachable_repository_marks_it_inaccessible() {
    let (pool, db_name) = create_test_db().await;
    let queue = QueueProvider::new(pool.clone(), QueueConfig::default());
    let org_id = Uuid::new_v4();

    let repo = repo_db::upsert_repository(
        &pool,
        org_id,
        "configs",
        RepositoryKind::Git,
        "file:///nonexistent/this-does-not-exist.git",
        None,
        60,
    )
    .await
    .unwrap();

    let outcome = poll_repository(&pool, &queue, repo.id).await.unwrap();
    match outcome {
        ProbeOutcome::BecameInaccessible { .. } => {}
        other => panic!("expected BecameInaccessible, got {other:?}"),
    }

    let updated = repo_db::get_repository(&pool, repo.id).await.unwrap().unwrap();
    assert!(updated.last_error.is_some());
    let condition = accessible_condition(&updated.conditions).expect("Accessible condition should be set");
    assert_eq!(condition.status, ConditionStatus::False);

    // A second poll against the same broken URL should report no further
    // transition.
    let second = poll_repository(&pool, &queue, repo.id).await.unwrap();
    assert_eq!(second, ProbeOutcome::Unchanged);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn polling_a_reachable_repository_marks_it_accessible() {
    let (pool, db_name) = create_test_db().await;
    let queue = QueueProvider::new(pool.clone(), QueueConfig::default());
    let org_id = Uuid::new_v4();

    let bare_repo = init_bare_repo().await;
    let url = format!("file://{}", bare_repo.path().display());

    let repo = repo_db::upsert_repository(&pool, org_id, "configs", RepositoryKind::Git, &url, None, 60)
        .await
        .unwrap();

    let outcome = poll_repository(&pool, &queue, repo.id).await.unwrap();
    match outcome {
        ProbeOutcome::BecameAccessible { .. } => {}
        other => panic!("expected BecameAccessible, got {other:?}"),
    }

    let updated = repo_db::get_repository(&pool, repo.id).await.unwrap().unwrap();
    assert!(updated.last_error.is_none());
    let condition = accessible_condition(&updated.conditions).expect("Accessible condition should be set");
    assert_eq!(condition.status, ConditionStatus::True);

    let second = poll_repository(&pool, &queue, repo.id).await.unwrap();
    assert_eq!(second, ProbeOutcome::Unchanged);

    drop_test_db(&db_name).await;
}
