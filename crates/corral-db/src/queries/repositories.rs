//! Database query functions for the `repositories` table.

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Repository, RepositoryKind};

/// Insert or update a repository's polling configuration by `(org_id, name)`.
pub async fn upsert_repository(
    pool: &PgPool,
    org_id: Uuid,
    name: &str,
    kind: RepositoryKind,
    url: &str,
    credential_ref: Option<&str>,
    poll_interval_secs: i32,
) -> Result<Repository> {
    let repo = sqlx::query_as::<_, Repository>(
        "INSERT INTO repositories (org_id, name, kind, url, credential_ref, poll_interval_secs) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         ON CONFLICT (org_id, name) DO UPDATE \
         SET kind = EXCLUDED.kind, \
             url = EXCLUDED.url, \
             credential_ref = EXCLUDED.credential_ref, \
             poll_interval_secs = EXCLUDED.poll_interval_secs, \
             updated_at = now() \
         RETURNING *",
    )
    .bind(org_id)
    .bind(name)
    .bind(kind)
    .bind(url)
    .bind(credential_ref)
    .bind(poll_interval_secs)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to upsert repository {org_id}/{name}"))?;

    Ok(repo)
}

/// Fetch a repository by ID.
pub async fn get_repository(pool: &PgPool, id: Uuid) -> Result<Option<Repository>> {
    let repo = sqlx::query_as::<_, Repository>("SELECT * FROM repositories WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch repository")?;

    Ok(repo)
}

/// Fetch a repository by its `(org_id, name)`, as referenced from a fleet's
/// provider config.
pub async fn get_by_name(pool: &PgPool, org_id: Uuid, name: &str) -> Result<Option<Repository>> {
    let repo = sqlx::query_as::<_, Repository>(
        "SELECT * FROM repositories WHERE org_id = $1 AND name = $2",
    )
    .bind(org_id)
    .bind(name)
    .fetch_optional(pool)
    .await
    .with_context(|| format!("failed to fetch repository {org_id}/{name}"))?;

    Ok(repo)
}

/// List repositories due for a poll: `last_polled_at` is null or older than
/// `poll_interval_secs`.
pub async fn list_due_for_poll(pool: &PgPool) -> Result<Vec<Repository>> {
    let rows = sqlx::query_as::<_, Repository>(
        "SELECT * FROM repositories \
         WHERE last_polled_at IS NULL \
            OR last_polled_at <= now() - (poll_interval_secs || ' seconds')::interval \
         ORDER BY last_polled_at ASC NULLS FIRST",
    )
    .fetch_all(pool)
    .await
    .context("failed to list repositories due for poll")?;

    Ok(rows)
}

/// Record the outcome of a poll: updates `last_polled_at` always, and
/// `last_hash`/`last_error` depending on success.
pub async fn record_poll_result(
    pool: &PgPool,
    id: Uuid,
    hash: Option<&str>,
    error: Option<&str>,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE repositories \
         SET last_polled_at = now(), \
             last_hash = COALESCE($2, last_hash), \
             last_error = $3, \
             updated_at = now() \
         WHERE id = $1",
    )
    .bind(id)
    .bind(hash)
    .bind(error)
    .execute(pool)
    .await
    .with_context(|| format!("failed to record poll result for repository {id}"))?;

    if result.rows_affected() == 0 {
        anyhow::bail!("repository {id} not found");
    }
    Ok(())
}

/// Set a repository's `conditions` array, as the poller does for
/// `Accessible` on every probe.
pub async fn set_conditions(pool: &PgPool, id: Uuid, conditions: &Value) -> Result<()> {
    let result = sqlx::query("UPDATE repositories SET conditions = $2, updated_at = now() WHERE id = $1")
        .bind(id)
        .bind(conditions)
        .execute(pool)
        .await
        .with_context(|| format!("failed to set conditions for repository {id}"))?;

    if result.rows_affected() == 0 {
        anyhow::bail!("repository {id} not found");
    }
    Ok(())
}

/// List every repository in an org.
pub async fn list_repositories(pool: &PgPool, org_id: Uuid) -> Result<Vec<Repository>> {
    let rows = sqlx::query_as::<_, Repository>(
        "SELECT * FROM repositories WHERE org_id = $1 ORDER BY created_at ASC",
    )
    .bind(org_id)
    .fetch_all(pool)
    .await
    .context("failed to list repositories")?;

    Ok(rows)
}

/// Delete a repository.
pub async fn delete_repository(pool: &PgPool, id: Uuid) -> Result<()> {
    let result = sqlx::query("DELETE FROM repositories WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .with_context(|| format!("failed to delete repository {id}"))?;

    if result.rows_affected() == 0 {
        anyhow::bail!("repository {id} not found");
    }
    Ok(())
}
