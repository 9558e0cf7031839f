//! Integration tests for the fleet selector matcher (C4): ownership
//! assignment, multi-owner conflicts, and overlapping-selector detection,
//! against a real Postgres instance.

use serde_json::json;
use uuid::Uuid;

use corral_db::models::OwnerKind;
use corral_db::queries::{devices as device_db, events as event_db, fleets as fleet_db};

use corral_core::matcher::reconcile_org;

use corral_test_utils::{create_test_db, drop_test_db};

#[tokio::test]
async fn single_matching_fleet_assigns_ownership() {
    let (pool, db_name) = create_test_db().await;
    let org_id = Uuid::new_v4();

    let fleet = fleet_db::upsert_fleet(&pool, org_id, "prod", &json!({}), &json!({"env": "prod"}), &json!({})).await.unwrap();
    let device = device_db::upsert_device(&pool, org_id, "dev-1", &json!({"env": "prod"})).await.unwrap();

    let summary = reconcile_org(&pool, org_id).await.unwrap();
    assert_eq!(summary.owners_changed, 1);
    assert_eq!(summary.multi_owner_transitions, 0);

    let updated = device_db::get_device(&pool, device.id).await.unwrap().unwrap();
    assert_eq!(updated.owner_kind, Some(OwnerKind::Fleet));
    assert_eq!(updated.owner_fleet_id, Some(fleet.id));

    let events = event_db::list_for_resource(&pool, device.id).await.unwrap();
    assert!(events.iter().any(|e| e.event_type == "ResourceUpdated"));

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn overlapping_selectors_flag_both_fleets_without_reassigning() {
    let (pool, db_name) = create_test_db().await;
    let org_id = Uuid::new_v4();

    fleet_db::upsert_fleet(&pool, org_id, "a", &json!({}), &json!({"env": "prod"}), &json!({})).await.unwrap();
    fleet_db::upsert_fleet(&pool, org_id, "b", &json!({}), &json!({"env": "prod"}), &json!({})).await.unwrap();
    let device = device_db::upsert_device(&pool, org_id, "dev-1", &json!({"env": "prod"})).await.unwrap();

    let summary = reconcile_org(&pool, org_id).await.unwrap();
    assert_eq!(summary.owners_changed, 0, "ambiguous owner must not be assigned");
    assert_eq!(summary.multi_owner_transitions, 1);
    assert_eq!(summary.fleets_overlapping, 2);

    let events = event_db::list_for_resource(&pool, device.id).await.unwrap();
    assert!(events.iter().any(|e| e.event_type == "DeviceMultipleOwnersDetected"));

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn reconcile_is_idempotent_on_a_stable_assignment() {
    let (pool, db_name) = create_test_db().await;
    let org_id = Uuid::new_v4();

    fleet_db::upsert_fleet(&pool, org_id, "prod", &json!({}), &json!({"env": "prod"}), &json!({})).await.unwrap();
    device_db::upsert_device(&pool, org_id, "dev-1", &json!({"env": "prod"})).await.unwrap();

    let first = reconcile_org(&pool, org_id).await.unwrap();
    assert_eq!(first.owners_changed, 1);

    let second = reconcile_org(&pool, org_id).await.unwrap();
    assert_eq!(second.owners_changed, 0, "a second pass with no label changes should touch nothing");

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn device_with_no_matching_fleet_loses_its_owner() {
    let (pool, db_name) = create_test_db().await;
    let org_id = Uuid::new_v4();

    fleet_db::upsert_fleet(&pool, org_id, "prod", &json!({}), &json!({"env": "prod"}), &json!({})).await.unwrap();
    let device = device_db::upsert_device(&pool, org_id, "dev-1", &json!({"env": "prod"})).await.unwrap();
    reconcile_org(&pool, org_id).await.unwrap();

    // Relabel the device so it no longer matches any fleet.
    device_db::upsert_device(&pool, org_id, "dev-1", &json!({"env": "staging"})).await.unwrap();
    let summary = reconcile_org(&pool, org_id).await.unwrap();
    assert_eq!(summary.owners_changed, 1);

    let updated = device_db::get_device(&pool, device.id).await.unwrap().unwrap();
    assert_eq!(updated.owner_fleet_id, None);

    drop_test_db(&db_name).await;
}
