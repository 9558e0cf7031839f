//! Database query functions for the `fleets` table.

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::Fleet;

/// Insert or update a fleet's selector/template by `(org_id, name)`.
pub async fn upsert_fleet(
    pool: &PgPool,
    org_id: Uuid,
    name: &str,
    labels: &Value,
    selector: &Value,
    template: &Value,
) -> Result<Fleet> {
    let fleet = sqlx::query_as::<_, Fleet>(
        "INSERT INTO fleets (org_id, name, labels, selector, template, conditions, resource_version) \
         VALUES ($1, $2, $3, $4, $5, '[]'::jsonb, 1) \
         ON CONFLICT (org_id, name) DO UPDATE \
         SET labels = EXCLUDED.labels, \
             selector = EXCLUDED.selector, \
             template = EXCLUDED.template, \
             resource_version = fleets.resource_version + 1, \
             updated_at = now() \
         RETURNING *",
    )
    .bind(org_id)
    .bind(name)
    .bind(labels)
    .bind(selector)
    .bind(template)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to upsert fleet {org_id}/{name}"))?;

    Ok(fleet)
}

/// Fetch a fleet by ID.
pub async fn get_fleet(pool: &PgPool, id: Uuid) -> Result<Option<Fleet>> {
    let fleet = sqlx::query_as::<_, Fleet>("SELECT * FROM fleets WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch fleet")?;

    Ok(fleet)
}

/// Fetch a fleet by its `(org_id, name)`, as used by the CLI's `get`/`delete`
/// commands where a human types a name rather than a UUID.
pub async fn get_by_name(pool: &PgPool, org_id: Uuid, name: &str) -> Result<Option<Fleet>> {
    let fleet = sqlx::query_as::<_, Fleet>(
        "SELECT * FROM fleets WHERE org_id = $1 AND name = $2",
    )
    .bind(org_id)
    .bind(name)
    .fetch_optional(pool)
    .await
    .with_context(|| format!("failed to fetch fleet {org_id}/{name}"))?;

    Ok(fleet)
}

/// List every fleet in an org.
pub async fn list_fleets(pool: &PgPool, org_id: Uuid) -> Result<Vec<Fleet>> {
    let fleets = sqlx::query_as::<_, Fleet>(
        "SELECT * FROM fleets WHERE org_id = $1 ORDER BY created_at ASC",
    )
    .bind(org_id)
    .fetch_all(pool)
    .await
    .context("failed to list fleets")?;

    Ok(fleets)
}

/// Replace a fleet's `conditions` array wholesale (e.g. after the selector
/// matcher computes `DeviceMultipleOwners`/`OverlappingSelectors`).
pub async fn set_conditions(pool: &PgPool, fleet_id: Uuid, conditions: &Value) -> Result<()> {
    let result = sqlx::query("UPDATE fleets SET conditions = $2, updated_at = now() WHERE id = $1")
        .bind(fleet_id)
        .bind(conditions)
        .execute(pool)
        .await
        .with_context(|| format!("failed to set conditions for fleet {fleet_id}"))?;

    if result.rows_affected() == 0 {
        anyhow::bail!("fleet {fleet_id} not found");
    }
    Ok(())
}

/// Delete a fleet.
pub async fn delete_fleet(pool: &PgPool, id: Uuid) -> Result<()> {
    let result = sqlx::query("DELETE FROM fleets WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .with_context(|| format!("failed to delete fleet {id}"))?;

    if result.rows_affected() == 0 {
        anyhow::bail!("fleet {id} not found");
    }
    Ok(())
}
