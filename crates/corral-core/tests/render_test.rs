//! Integration tests for device render (C7): resolving a device's desired
//! template into files, idempotent hash-based skip, and forbidden-root
//! enforcement, against a real Postgres instance.

use std::path::PathBuf;

use serde_json::json;
use uuid::Uuid;

use corral_db::queries::{devices as device_db, fleets as fleet_db, template_versions as tv_db};

use corral_core::render::{render_device, ForbiddenRoots, ProviderRegistry, RenderOutcome};

use corral_test_utils::{create_test_db, drop_test_db};

async fn seed_device_with_template(
    pool: &sqlx::PgPool,
    org_id: Uuid,
    config: serde_json::Value,
) -> Uuid {
    let fleet = fleet_db::upsert_fleet(pool, org_id, "prod", &json!({}), &json!({}), &json!({})).await.unwrap();
    let device = device_db::upsert_device(pool, org_id, "dev-1", &json!({})).await.unwrap();

    let template = json!({ "metadata": {}, "spec": { "config": [config] } });
    let tv = tv_db::insert_template_version(pool, fleet.id, "v1", &template, true, &json!([])).await.unwrap();

    device_db::set_owner(pool, device.id, Some((fleet.id, "prod")), device.resource_version).await.unwrap();
    device_db::set_desired_template_version(pool, device.id, tv.id, device.resource_version + 1).await.unwrap();
    device.id
}

fn inline_config(path: &str, content: &str) -> serde_json::Value {
    json!({
        "discriminator": "Inline",
        "name": "motd",
        "path": path,
        "content": content,
        "base64": false,
    })
}

#[tokio::test]
async fn renders_an_inline_provider_and_records_the_event() {
    let (pool, db_name) = create_test_db().await;
    let org_id = Uuid::new_v4();
    let device_id = seed_device_with_template(&pool, org_id, inline_config("/etc/motd", "hello")).await;

    let registry = ProviderRegistry::with_defaults();
    let forbidden_roots = ForbiddenRoots::new([PathBuf::from("/var/lib/corral")]);

    let outcome = render_device(&pool, &registry, &forbidden_roots, device_id).await.unwrap();
    match outcome {
        RenderOutcome::Rendered { .. } => {}
        other => panic!("expected Rendered, got {other:?}"),
    }

    let device = device_db::get_device(&pool, device_id).await.unwrap().unwrap();
    assert!(device.rendered_hash.is_some());

    let events = corral_db::queries::events::list_for_resource(&pool, device_id).await.unwrap();
    assert!(events.iter().any(|e| e.event_type == "ResourceUpdated"));

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn a_second_render_with_unchanged_content_is_skipped() {
    let (pool, db_name) = create_test_db().await;
    let org_id = Uuid::new_v4();
    let device_id = seed_device_with_template(&pool, org_id, inline_config("/etc/motd", "hello")).await;

    let registry = ProviderRegistry::with_defaults();
    let forbidden_roots = ForbiddenRoots::new([PathBuf::from("/var/lib/corral")]);

    render_device(&pool, &registry, &forbidden_roots, device_id).await.unwrap();
    let second = render_device(&pool, &registry, &forbidden_roots, device_id).await.unwrap();
    assert_eq!(second, RenderOutcome::Skipped);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn a_path_under_a_forbidden_root_fails_the_render() {
    let (pool, db_name) = create_test_db().await;
    let org_id = Uuid::new_v4();
    let device_id = seed_device_with_template(&pool, org_id, inline_config("/var/lib/corral/state.db", "hello")).await;

    let registry = ProviderRegistry::with_defaults();
    let forbidden_roots = ForbiddenRoots::new([PathBuf::from("/var/lib/corral")]);

    let err = render_device(&pool, &registry, &forbidden_roots, device_id).await.unwrap_err();
    let corral_err = err.downcast::<corral_core::error::CorralError>().expect("should be a CorralError");
    assert!(matches!(corral_err, corral_core::error::CorralError::ForbiddenDevicePath { .. }));

    let device = device_db::get_device(&pool, device_id).await.unwrap().unwrap();
    assert!(device.rendered_hash.is_none(), "no partial state should be written on a forbidden path");

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn a_device_with_no_fleet_owner_has_nothing_to_render() {
    let (pool, db_name) = create_test_db().await;
    let org_id = Uuid::new_v4();
    let device = device_db::upsert_device(&pool, org_id, "dev-1", &json!({})).await.unwrap();

    let registry = ProviderRegistry::with_defaults();
    let forbidden_roots = ForbiddenRoots::new([PathBuf::from("/var/lib/corral")]);

    let outcome = render_device(&pool, &registry, &forbidden_roots, device.id).await.unwrap();
    assert_eq!(outcome, RenderOutcome::NothingToRender);

    drop_test_db(&db_name).await;
}
