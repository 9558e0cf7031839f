//! Database query functions for the `devices` table.

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Device, OwnerKind};

/// Insert a device, or update its labels/conditions if one with the same
/// `(org_id, name)` already exists. Idempotent seeding, matching how device
/// registration is expected to behave when re-run.
pub async fn upsert_device(
    pool: &PgPool,
    org_id: Uuid,
    name: &str,
    labels: &Value,
) -> Result<Device> {
    let device = sqlx::query_as::<_, Device>(
        "INSERT INTO devices (org_id, name, labels, conditions, resource_version) \
         VALUES ($1, $2, $3, '[]'::jsonb, 1) \
         ON CONFLICT (org_id, name) DO UPDATE \
         SET labels = EXCLUDED.labels, \
             resource_version = devices.resource_version + 1, \
             updated_at = now() \
         RETURNING *",
    )
    .bind(org_id)
    .bind(name)
    .bind(labels)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to upsert device {org_id}/{name}"))?;

    Ok(device)
}

/// Fetch a device by ID.
pub async fn get_device(pool: &PgPool, id: Uuid) -> Result<Option<Device>> {
    let device = sqlx::query_as::<_, Device>("SELECT * FROM devices WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch device")?;

    Ok(device)
}

/// Fetch a device by its `(org_id, name)`, as used by the CLI's `get`/`delete`
/// commands where a human types a name rather than a UUID.
pub async fn get_by_name(pool: &PgPool, org_id: Uuid, name: &str) -> Result<Option<Device>> {
    let device = sqlx::query_as::<_, Device>(
        "SELECT * FROM devices WHERE org_id = $1 AND name = $2",
    )
    .bind(org_id)
    .bind(name)
    .fetch_optional(pool)
    .await
    .with_context(|| format!("failed to fetch device {org_id}/{name}"))?;

    Ok(device)
}

/// List every device in an org, newest first.
pub async fn list_devices(pool: &PgPool, org_id: Uuid) -> Result<Vec<Device>> {
    let devices = sqlx::query_as::<_, Device>(
        "SELECT * FROM devices WHERE org_id = $1 ORDER BY created_at DESC",
    )
    .bind(org_id)
    .fetch_all(pool)
    .await
    .context("failed to list devices")?;

    Ok(devices)
}

/// List devices that the selector matcher is free to reassign: no owner at
/// all, or an owner that is itself a fleet (a `User`-owned device is pinned
/// and never considered).
pub async fn list_matchable_devices(pool: &PgPool, org_id: Uuid) -> Result<Vec<Device>> {
    let devices = sqlx::query_as::<_, Device>(
        "SELECT * FROM devices WHERE org_id = $1 AND (owner_kind IS NULL OR owner_kind = 'Fleet') \
         ORDER BY created_at ASC",
    )
    .bind(org_id)
    .fetch_all(pool)
    .await
    .context("failed to list matchable devices")?;

    Ok(devices)
}

/// Assign (or clear, with `fleet = None`) a device's owning fleet and bump
/// its resource version. Optimistic concurrency: the caller must pass the
/// `resource_version` it last observed; a mismatch yields 0 rows affected
/// and `None` is returned. Never touches a `User`-owned device's owner --
/// callers are expected to have filtered those out via
/// [`list_matchable_devices`] already.
pub async fn set_owner(
    pool: &PgPool,
    device_id: Uuid,
    fleet: Option<(Uuid, &str)>,
    expected_resource_version: i64,
) -> Result<Option<Device>> {
    let (owner_kind, owner_name, owner_fleet_id) = match fleet {
        Some((id, name)) => (Some(OwnerKind::Fleet), Some(name.to_string()), Some(id)),
        None => (None, None, None),
    };

    let device = sqlx::query_as::<_, Device>(
        "UPDATE devices \
         SET owner_kind = $2, owner_name = $3, owner_fleet_id = $4, \
             resource_version = resource_version + 1, updated_at = now() \
         WHERE id = $1 AND resource_version = $5 \
         RETURNING *",
    )
    .bind(device_id)
    .bind(owner_kind)
    .bind(owner_name)
    .bind(owner_fleet_id)
    .bind(expected_resource_version)
    .fetch_optional(pool)
    .await
    .with_context(|| format!("failed to set owner for device {device_id}"))?;

    Ok(device)
}

/// Replace a device's `conditions` array wholesale.
pub async fn set_conditions(pool: &PgPool, device_id: Uuid, conditions: &Value) -> Result<()> {
    let result = sqlx::query(
        "UPDATE devices SET conditions = $2, updated_at = now() WHERE id = $1",
    )
    .bind(device_id)
    .bind(conditions)
    .execute(pool)
    .await
    .with_context(|| format!("failed to set conditions for device {device_id}"))?;

    if result.rows_affected() == 0 {
        anyhow::bail!("device {device_id} not found");
    }
    Ok(())
}

/// Set the desired template version a device should render, optimistically
/// guarded by `resource_version` the same way [`set_owner`] is.
pub async fn set_desired_template_version(
    pool: &PgPool,
    device_id: Uuid,
    template_version_id: Uuid,
    expected_resource_version: i64,
) -> Result<Option<Device>> {
    let device = sqlx::query_as::<_, Device>(
        "UPDATE devices \
         SET desired_template_version_id = $2, resource_version = resource_version + 1, \
             updated_at = now() \
         WHERE id = $1 AND resource_version = $3 \
         RETURNING *",
    )
    .bind(device_id)
    .bind(template_version_id)
    .bind(expected_resource_version)
    .fetch_optional(pool)
    .await
    .with_context(|| format!("failed to set desired template version for device {device_id}"))?;

    Ok(device)
}

/// Record that a rendered config was applied: bump `rendered_hash` and
/// `rendered_template_version_id`. Idempotent: if `rendered_hash` already
/// matches, the caller should skip calling this at all (render's
/// idempotent-skip rule).
pub async fn record_render(
    pool: &PgPool,
    device_id: Uuid,
    template_version_id: Uuid,
    rendered_hash: &str,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE devices \
         SET rendered_hash = $2, rendered_template_version_id = $3, updated_at = now() \
         WHERE id = $1",
    )
    .bind(device_id)
    .bind(rendered_hash)
    .bind(template_version_id)
    .execute(pool)
    .await
    .with_context(|| format!("failed to record render for device {device_id}"))?;

    if result.rows_affected() == 0 {
        anyhow::bail!("device {device_id} not found");
    }
    Ok(())
}

/// Touch `last_seen_at` on a heartbeat, independent of rendering.
pub async fn touch_last_seen(pool: &PgPool, device_id: Uuid) -> Result<()> {
    let result = sqlx::query("UPDATE devices SET last_seen_at = now() WHERE id = $1")
        .bind(device_id)
        .execute(pool)
        .await
        .with_context(|| format!("failed to touch last_seen_at for device {device_id}"))?;

    if result.rows_affected() == 0 {
        anyhow::bail!("device {device_id} not found");
    }
    Ok(())
}

/// List devices that have not been seen since `cutoff` and are not already
/// flagged `Disconnected` in their conditions -- candidates for the
/// liveness sweep.
pub async fn list_stale_devices(pool: &PgPool, cutoff: chrono::DateTime<chrono::Utc>) -> Result<Vec<Device>> {
    let devices = sqlx::query_as::<_, Device>(
        "SELECT * FROM devices \
         WHERE (last_seen_at IS NULL OR last_seen_at <= $1) \
         ORDER BY id ASC",
    )
    .bind(cutoff)
    .fetch_all(pool)
    .await
    .context("failed to list stale devices")?;

    Ok(devices)
}

/// Delete a device.
pub async fn delete_device(pool: &PgPool, id: Uuid) -> Result<()> {
    let result = sqlx::query("DELETE FROM devices WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .with_context(|| format!("failed to delete device {id}"))?;

    if result.rows_affected() == 0 {
        anyhow::bail!("device {id} not found");
    }
    Ok(())
}
