//! Database query functions for the append-only `events` audit log.

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::Event;

/// Record a control-plane event.
pub async fn record_event(
    pool: &PgPool,
    resource_type: &str,
    resource_id: Uuid,
    event_type: &str,
    payload: &Value,
) -> Result<Event> {
    let event = sqlx::query_as::<_, Event>(
        "INSERT INTO events (resource_type, resource_id, event_type, payload) \
         VALUES ($1, $2, $3, $4) \
         RETURNING *",
    )
    .bind(resource_type)
    .bind(resource_id)
    .bind(event_type)
    .bind(payload)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to record event for {resource_type} {resource_id}"))?;

    Ok(event)
}

/// List events for a resource, oldest first.
pub async fn list_for_resource(pool: &PgPool, resource_id: Uuid) -> Result<Vec<Event>> {
    let events = sqlx::query_as::<_, Event>(
        "SELECT * FROM events WHERE resource_id = $1 ORDER BY recorded_at ASC",
    )
    .bind(resource_id)
    .fetch_all(pool)
    .await
    .with_context(|| format!("failed to list events for {resource_id}"))?;

    Ok(events)
}

/// List events with `id > after_id`, oldest first, capped at `limit` -- the
/// alert exporter's replay cursor walks the stream in batches this way.
pub async fn list_since(pool: &PgPool, after_id: i64, limit: i64) -> Result<Vec<Event>> {
    let events = sqlx::query_as::<_, Event>(
        "SELECT * FROM events WHERE id > $1 ORDER BY id ASC LIMIT $2",
    )
    .bind(after_id)
    .bind(limit)
    .fetch_all(pool)
    .await
    .with_context(|| format!("failed to list events since {after_id}"))?;

    Ok(events)
}
