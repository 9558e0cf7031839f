//! Integration tests for the liveness poller (C9a): disconnect sweep and
//! heartbeat reconnection, including the `DeviceDisconnected`/
//! `DeviceConnected` events the alert exporter consumes.

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use corral_db::models::ConditionStatus;
use corral_db::queries::{devices as device_db, events as event_db};

use corral_core::liveness::{record_heartbeat, sweep};

use corral_test_utils::{create_test_db, drop_test_db};

fn has_true_condition(conditions: &serde_json::Value, kind: &str) -> bool {
    let parsed: Vec<corral_db::models::Condition> = serde_json::from_value(conditions.clone()).unwrap_or_default();
    parsed.iter().any(|c| c.kind == kind && c.status == ConditionStatus::True)
}

#[tokio::test]
async fn sweep_flags_a_device_past_the_heartbeat_timeout() {
    let (pool, db_name) = create_test_db().await;
    let org_id = Uuid::new_v4();
    let device = device_db::upsert_device(&pool, org_id, "dev-1", &json!({})).await.unwrap();

    let stale_time = Utc::now() - chrono::Duration::hours(1);
    sqlx::query("UPDATE devices SET last_seen_at = $1 WHERE id = $2")
        .bind(stale_time)
        .bind(device.id)
        .execute(&pool)
        .await
        .unwrap();

    let summary = sweep(&pool, chrono::Duration::minutes(5), Utc::now()).await.unwrap();
    assert_eq!(summary.newly_disconnected, 1);

    let updated = device_db::get_device(&pool, device.id).await.unwrap().unwrap();
    assert!(has_true_condition(&updated.conditions, "Disconnected"));

    let events = event_db::list_for_resource(&pool, device.id).await.unwrap();
    assert!(events.iter().any(|e| e.event_type == "DeviceDisconnected"));

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn sweep_is_a_no_op_for_a_device_already_disconnected() {
    let (pool, db_name) = create_test_db().await;
    let org_id = Uuid::new_v4();
    let device = device_db::upsert_device(&pool, org_id, "dev-1", &json!({})).await.unwrap();

    let stale_time = Utc::now() - chrono::Duration::hours(1);
    sqlx::query("UPDATE devices SET last_seen_at = $1 WHERE id = $2")
        .bind(stale_time)
        .bind(device.id)
        .execute(&pool)
        .await
        .unwrap();

    sweep(&pool, chrono::Duration::minutes(5), Utc::now()).await.unwrap();
    let second = sweep(&pool, chrono::Duration::minutes(5), Utc::now()).await.unwrap();
    assert_eq!(second.newly_disconnected, 0);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn heartbeat_reconnects_a_disconnected_device() {
    let (pool, db_name) = create_test_db().await;
    let org_id = Uuid::new_v4();
    let device = device_db::upsert_device(&pool, org_id, "dev-1", &json!({})).await.unwrap();

    let stale_time = Utc::now() - chrono::Duration::hours(1);
    sqlx::query("UPDATE devices SET last_seen_at = $1 WHERE id = $2")
        .bind(stale_time)
        .bind(device.id)
        .execute(&pool)
        .await
        .unwrap();
    sweep(&pool, chrono::Duration::minutes(5), Utc::now()).await.unwrap();

    let reconnected = record_heartbeat(&pool, device.id, Utc::now()).await.unwrap();
    assert!(reconnected);

    let updated = device_db::get_device(&pool, device.id).await.unwrap().unwrap();
    assert!(!has_true_condition(&updated.conditions, "Disconnected"));
    assert!(updated.last_seen_at.is_some());

    let events = event_db::list_for_resource(&pool, device.id).await.unwrap();
    assert!(events.iter().any(|e| e.event_type == "DeviceConnected"));

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn heartbeat_on_a_healthy_device_reports_no_reconnection() {
    let (pool, db_name) = create_test_db().await;
    let org_id = Uuid::new_v4();
    let device = device_db::upsert_device(&pool, org_id, "dev-1", &json!({})).await.unwrap();

    let reconnected = record_heartbeat(&pool, device.id, Utc::now()).await.unwrap();
    assert!(!reconnected);

    drop_test_db(&db_name).await;
}
