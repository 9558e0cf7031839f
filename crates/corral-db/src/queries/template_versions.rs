//! Database query functions for the `template_versions` table.

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::TemplateVersion;

/// Insert a new, immutable template version snapshot for a fleet.
pub async fn insert_template_version(
    pool: &PgPool,
    fleet_id: Uuid,
    name: &str,
    template: &Value,
    valid: bool,
    validation_errors: &Value,
) -> Result<TemplateVersion> {
    let tv = sqlx::query_as::<_, TemplateVersion>(
        "INSERT INTO template_versions (fleet_id, name, template, valid, validation_errors) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING *",
    )
    .bind(fleet_id)
    .bind(name)
    .bind(template)
    .bind(valid)
    .bind(validation_errors)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to insert template version for fleet {fleet_id}"))?;

    Ok(tv)
}

/// Fetch a template version by ID.
pub async fn get_template_version(pool: &PgPool, id: Uuid) -> Result<Option<TemplateVersion>> {
    let tv = sqlx::query_as::<_, TemplateVersion>("SELECT * FROM template_versions WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch template version")?;

    Ok(tv)
}

/// Fetch the most recent valid template version for a fleet.
pub async fn latest_valid(pool: &PgPool, fleet_id: Uuid) -> Result<Option<TemplateVersion>> {
    let tv = sqlx::query_as::<_, TemplateVersion>(
        "SELECT * FROM template_versions \
         WHERE fleet_id = $1 AND valid = true \
         ORDER BY created_at DESC \
         LIMIT 1",
    )
    .bind(fleet_id)
    .fetch_optional(pool)
    .await
    .with_context(|| format!("failed to fetch latest valid template version for fleet {fleet_id}"))?;

    Ok(tv)
}

/// List all template versions for a fleet, newest first.
pub async fn list_for_fleet(pool: &PgPool, fleet_id: Uuid) -> Result<Vec<TemplateVersion>> {
    let rows = sqlx::query_as::<_, TemplateVersion>(
        "SELECT * FROM template_versions WHERE fleet_id = $1 ORDER BY created_at DESC",
    )
    .bind(fleet_id)
    .fetch_all(pool)
    .await
    .with_context(|| format!("failed to list template versions for fleet {fleet_id}"))?;

    Ok(rows)
}
