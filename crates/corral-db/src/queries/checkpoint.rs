//! Database query functions backing the checkpoint manager's prefix-complete
//! watermark scan, and the generic per-consumer checkpoint table used by the
//! alert exporter's replayable cursor.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;

use crate::models::{ConsumerCheckpoint, InFlightTask, QueueCheckpoint};

/// List in-flight entries for a queue, ordered by enqueue time ascending --
/// the order the prefix-complete scan walks.
pub async fn list_in_flight(pool: &PgPool, queue_name: &str) -> Result<Vec<InFlightTask>> {
    let rows = sqlx::query_as::<_, InFlightTask>(
        "SELECT * FROM in_flight_tasks \
         WHERE queue_name = $1 \
         ORDER BY enqueued_at ASC",
    )
    .bind(queue_name)
    .fetch_all(pool)
    .await
    .with_context(|| format!("failed to list in-flight entries for {queue_name}"))?;

    Ok(rows)
}

/// Fetch the current checkpoint for a queue, if one has ever been recorded.
pub async fn get_checkpoint(pool: &PgPool, queue_name: &str) -> Result<Option<QueueCheckpoint>> {
    let row = sqlx::query_as::<_, QueueCheckpoint>(
        "SELECT * FROM queue_checkpoints WHERE queue_name = $1",
    )
    .bind(queue_name)
    .fetch_optional(pool)
    .await
    .with_context(|| format!("failed to fetch checkpoint for {queue_name}"))?;

    Ok(row)
}

/// Advance (or initialize) a queue's checkpoint watermark. The caller is
/// responsible for ensuring `watermark` only ever moves forward -- this
/// query still guards it with a `GREATEST` so a stale caller cannot regress
/// the watermark under concurrent advancement.
pub async fn advance_checkpoint(
    pool: &PgPool,
    queue_name: &str,
    watermark: DateTime<Utc>,
) -> Result<QueueCheckpoint> {
    let row = sqlx::query_as::<_, QueueCheckpoint>(
        "INSERT INTO queue_checkpoints (queue_name, watermark, updated_at) \
         VALUES ($1, $2, now()) \
         ON CONFLICT (queue_name) DO UPDATE \
         SET watermark = GREATEST(queue_checkpoints.watermark, EXCLUDED.watermark), \
             updated_at = now() \
         RETURNING *",
    )
    .bind(queue_name)
    .bind(watermark)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to advance checkpoint for {queue_name}"))?;

    Ok(row)
}

/// Prune completed in-flight rows at or before a watermark -- once a prefix
/// is checkpointed it no longer needs to be scanned.
pub async fn prune_in_flight_before(
    pool: &PgPool,
    queue_name: &str,
    watermark: DateTime<Utc>,
) -> Result<u64> {
    let result = sqlx::query(
        "DELETE FROM in_flight_tasks \
         WHERE queue_name = $1 AND completed = true AND enqueued_at <= $2",
    )
    .bind(queue_name)
    .bind(watermark)
    .execute(pool)
    .await
    .with_context(|| format!("failed to prune in-flight entries for {queue_name}"))?;

    Ok(result.rows_affected())
}

/// Fetch a named consumer's replay checkpoint (e.g. the alert exporter's
/// `AlertCheckpoint`).
pub async fn get_consumer_checkpoint(
    pool: &PgPool,
    consumer_name: &str,
) -> Result<Option<ConsumerCheckpoint>> {
    let row = sqlx::query_as::<_, ConsumerCheckpoint>(
        "SELECT * FROM consumer_checkpoints WHERE consumer_name = $1",
    )
    .bind(consumer_name)
    .fetch_optional(pool)
    .await
    .with_context(|| format!("failed to fetch consumer checkpoint for {consumer_name}"))?;

    Ok(row)
}

/// Persist a named consumer's replay checkpoint.
pub async fn put_consumer_checkpoint(
    pool: &PgPool,
    consumer_name: &str,
    checkpoint: &Value,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO consumer_checkpoints (consumer_name, checkpoint, updated_at) \
         VALUES ($1, $2, now()) \
         ON CONFLICT (consumer_name) DO UPDATE \
         SET checkpoint = EXCLUDED.checkpoint, updated_at = now()",
    )
    .bind(consumer_name)
    .bind(checkpoint)
    .execute(pool)
    .await
    .with_context(|| format!("failed to persist consumer checkpoint for {consumer_name}"))?;

    Ok(())
}
