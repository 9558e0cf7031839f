//! Integration tests for the task dispatcher (C3): handler failure wiring
//! to `InternalTaskFailed` events, handler timeouts, and the maintenance
//! loop's checkpoint/reclaim sweep.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use corral_db::models::QueueEntryStatus;
use corral_db::queries::{events as event_db, queue as queue_db};

use corral_core::config::QueueConfig;
use corral_core::dispatch::{run_dispatcher, DispatcherConfig, QueueHandler};
use corral_core::queue::{CheckpointManager, QueueProvider};

use corral_test_utils::{create_test_db, drop_test_db};

struct AlwaysFails;

#[async_trait]
impl QueueHandler for AlwaysFails {
    fn queue_name(&self) -> &'static str {
        "fleet-validate"
    }

    async fn handle(&self, _payload: Value) -> anyhow::Result<()> {
        anyhow::bail!("handler deliberately failed")
    }
}

struct NeverReturns;

#[async_trait]
impl QueueHandler for NeverReturns {
    fn queue_name(&self) -> &'static str {
        "fleet-validate"
    }

    async fn handle(&self, _payload: Value) -> anyhow::Result<()> {
        std::future::pending::<()>().await;
        unreachable!()
    }
}

#[tokio::test]
async fn a_failing_handler_records_internal_task_failed_and_retries() {
    let (pool, db_name) = create_test_db().await;
    let queue = QueueProvider::new(pool.clone(), QueueConfig { base_delay_ms: 1, max_delay_ms: 5, ..QueueConfig::default() });
    let checkpoints = CheckpointManager::new(pool.clone());

    let entry = queue.enqueue("fleet-validate", serde_json::json!({ "fleetId": Uuid::new_v4() })).await.unwrap();

    let cancel = CancellationToken::new();
    let config = DispatcherConfig { poll_interval: Duration::from_millis(20), ..DispatcherConfig::default() };
    let handlers: Vec<Arc<dyn QueueHandler>> = vec![Arc::new(AlwaysFails)];

    let cancel_clone = cancel.clone();
    let dispatcher = tokio::spawn(run_dispatcher(pool.clone(), queue.clone(), checkpoints, handlers, config, cancel_clone));

    // Give the consumer loop time to claim and fail the entry at least once.
    tokio::time::sleep(Duration::from_millis(200)).await;
    cancel.cancel();
    dispatcher.await.unwrap();

    let row = queue_db::get_entry(&pool, entry.id).await.unwrap().unwrap();
    assert!(row.attempt >= 1, "a failing handler should have triggered at least one retry");
    assert_eq!(row.status, QueueEntryStatus::Ready);

    let events = event_db::list_for_resource(&pool, entry.id).await.unwrap();
    assert!(events.iter().any(|e| e.event_type == "InternalTaskFailed"));

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn a_handler_that_never_returns_is_treated_as_a_timeout_failure() {
    let (pool, db_name) = create_test_db().await;
    let queue = QueueProvider::new(pool.clone(), QueueConfig::default());
    let checkpoints = CheckpointManager::new(pool.clone());

    let entry = queue.enqueue("fleet-validate", serde_json::json!({})).await.unwrap();

    let cancel = CancellationToken::new();
    let config = DispatcherConfig {
        poll_interval: Duration::from_millis(20),
        handler_timeout: Duration::from_millis(50),
        ..DispatcherConfig::default()
    };
    let handlers: Vec<Arc<dyn QueueHandler>> = vec![Arc::new(NeverReturns)];

    let cancel_clone = cancel.clone();
    let dispatcher = tokio::spawn(run_dispatcher(pool.clone(), queue.clone(), checkpoints, handlers, config, cancel_clone));

    tokio::time::sleep(Duration::from_millis(200)).await;
    cancel.cancel();
    dispatcher.await.unwrap();

    let row = queue_db::get_entry(&pool, entry.id).await.unwrap().unwrap();
    assert!(row.attempt >= 1, "the handler timeout should have been treated as a failure");

    let events = event_db::list_for_resource(&pool, entry.id).await.unwrap();
    assert!(events.iter().any(|e| e.event_type == "InternalTaskFailed"));

    drop_test_db(&db_name).await;
}
