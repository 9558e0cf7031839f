//! Database query functions for the durable queue substrate: the stream
//! (`queue_entries`), the pending-entries list, the failed-messages
//! quarantine, and the in-flight set used by the checkpoint scan.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{FailedMessage, PendingEntry, QueueEntry};

/// Append a new entry to a queue. Status starts `ready`, available immediately.
pub async fn enqueue(pool: &PgPool, queue_name: &str, payload: &Value) -> Result<QueueEntry> {
    let entry = sqlx::query_as::<_, QueueEntry>(
        "INSERT INTO queue_entries (queue_name, payload, status, attempt, available_at) \
         VALUES ($1, $2, 'ready', 0, now()) \
         RETURNING *",
    )
    .bind(queue_name)
    .bind(payload)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to enqueue entry on queue {queue_name}"))?;

    sqlx::query(
        "INSERT INTO in_flight_tasks (entry_id, queue_name, enqueued_at, completed) \
         VALUES ($1, $2, $3, false)",
    )
    .bind(entry.id)
    .bind(queue_name)
    .bind(entry.enqueued_at)
    .execute(pool)
    .await
    .with_context(|| format!("failed to track in-flight entry {}", entry.id))?;

    Ok(entry)
}

/// Atomically claim the oldest ready-and-available entry on a queue for a
/// consumer. Uses `FOR UPDATE SKIP LOCKED` so concurrent consumers on the
/// same queue never double-deliver the same row.
pub async fn claim_next(
    pool: &PgPool,
    queue_name: &str,
    consumer_id: &str,
) -> Result<Option<QueueEntry>> {
    let mut tx = pool.begin().await.context("failed to begin claim tx")?;

    let entry = sqlx::query_as::<_, QueueEntry>(
        "SELECT * FROM queue_entries \
         WHERE queue_name = $1 AND status = 'ready' AND available_at <= now() \
         ORDER BY enqueued_at ASC \
         FOR UPDATE SKIP LOCKED \
         LIMIT 1",
    )
    .bind(queue_name)
    .fetch_optional(&mut *tx)
    .await
    .with_context(|| format!("failed to claim from queue {queue_name}"))?;

    let Some(entry) = entry else {
        tx.commit().await.ok();
        return Ok(None);
    };

    sqlx::query("UPDATE queue_entries SET status = 'delivered' WHERE id = $1")
        .bind(entry.id)
        .execute(&mut *tx)
        .await
        .context("failed to mark entry delivered")?;

    sqlx::query(
        "INSERT INTO pending_entries (entry_id, queue_name, consumer_id, delivered_at) \
         VALUES ($1, $2, $3, now())",
    )
    .bind(entry.id)
    .bind(queue_name)
    .bind(consumer_id)
    .execute(&mut *tx)
    .await
    .context("failed to record pending entry")?;

    tx.commit().await.context("failed to commit claim tx")?;

    Ok(Some(QueueEntry {
        status: crate::models::QueueEntryStatus::Delivered,
        ..entry
    }))
}

/// Acknowledge successful processing of an entry: mark it completed, drop
/// its pending-entries row, and mark it completed in the in-flight set.
pub async fn ack(pool: &PgPool, entry_id: Uuid) -> Result<()> {
    let mut tx = pool.begin().await.context("failed to begin ack tx")?;

    let result = sqlx::query(
        "UPDATE queue_entries SET status = 'completed' WHERE id = $1 AND status = 'delivered'",
    )
    .bind(entry_id)
    .execute(&mut *tx)
    .await
    .context("failed to mark entry completed")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("entry {entry_id} not found or not in delivered state");
    }

    sqlx::query("DELETE FROM pending_entries WHERE entry_id = $1")
        .bind(entry_id)
        .execute(&mut *tx)
        .await
        .context("failed to clear pending entry")?;

    sqlx::query("UPDATE in_flight_tasks SET completed = true WHERE entry_id = $1")
        .bind(entry_id)
        .execute(&mut *tx)
        .await
        .context("failed to mark in-flight entry completed")?;

    tx.commit().await.context("failed to commit ack tx")?;
    Ok(())
}

/// Requeue an entry for another attempt, after incrementing its attempt
/// counter and computing the next `available_at` via backoff.
///
/// Only affects an entry currently `delivered`, so a reclaim racing a
/// concurrent `ack` never resurrects work already marked complete.
/// Returns `None` when that precondition didn't hold.
pub async fn requeue(
    pool: &PgPool,
    entry_id: Uuid,
    next_available_at: DateTime<Utc>,
) -> Result<Option<QueueEntry>> {
    let mut tx = pool.begin().await.context("failed to begin requeue tx")?;

    let entry = sqlx::query_as::<_, QueueEntry>(
        "UPDATE queue_entries \
         SET status = 'ready', attempt = attempt + 1, available_at = $2 \
         WHERE id = $1 AND status = 'delivered' \
         RETURNING *",
    )
    .bind(entry_id)
    .bind(next_available_at)
    .fetch_optional(&mut *tx)
    .await
    .context("failed to requeue entry")?;

    let Some(entry) = entry else {
        tx.commit().await.ok();
        return Ok(None);
    };

    sqlx::query("DELETE FROM pending_entries WHERE entry_id = $1")
        .bind(entry_id)
        .execute(&mut *tx)
        .await
        .context("failed to clear pending entry on requeue")?;

    tx.commit().await.context("failed to commit requeue tx")?;
    Ok(Some(entry))
}

/// Permanently fail an entry: mark it `dead` and record it in the
/// quarantine table. Also marks it completed in the in-flight set so the
/// checkpoint watermark is not blocked forever by a dead entry.
///
/// Only affects an entry currently `delivered`, for the same reason as
/// [`requeue`]. Returns `None` when that precondition didn't hold.
pub async fn mark_dead(pool: &PgPool, entry_id: Uuid, last_error: &str) -> Result<Option<QueueEntry>> {
    let mut tx = pool.begin().await.context("failed to begin mark-dead tx")?;

    let entry = sqlx::query_as::<_, QueueEntry>(
        "UPDATE queue_entries SET status = 'dead' WHERE id = $1 AND status = 'delivered' RETURNING *",
    )
    .bind(entry_id)
    .fetch_optional(&mut *tx)
    .await
    .context("failed to mark entry dead")?;

    let Some(entry) = entry else {
        tx.commit().await.ok();
        return Ok(None);
    };

    sqlx::query(
        "INSERT INTO failed_messages (entry_id, queue_name, fail_count, last_error, failed_at) \
         VALUES ($1, $2, $3, $4, now()) \
         ON CONFLICT (entry_id) DO UPDATE \
         SET fail_count = failed_messages.fail_count + 1, \
             last_error = EXCLUDED.last_error, \
             failed_at = now()",
    )
    .bind(entry_id)
    .bind(&entry.queue_name)
    .bind(entry.attempt)
    .bind(last_error)
    .execute(&mut *tx)
    .await
    .context("failed to record failed message")?;

    sqlx::query("DELETE FROM pending_entries WHERE entry_id = $1")
        .bind(entry_id)
        .execute(&mut *tx)
        .await
        .context("failed to clear pending entry on dead-letter")?;

    sqlx::query("UPDATE in_flight_tasks SET completed = true WHERE entry_id = $1")
        .bind(entry_id)
        .execute(&mut *tx)
        .await
        .context("failed to mark in-flight entry completed (dead)")?;

    tx.commit().await.context("failed to commit mark-dead tx")?;
    Ok(Some(entry))
}

/// List pending entries whose delivery has exceeded `pending_timeout`.
pub async fn list_timed_out(
    pool: &PgPool,
    queue_name: &str,
    cutoff: DateTime<Utc>,
) -> Result<Vec<PendingEntry>> {
    let rows = sqlx::query_as::<_, PendingEntry>(
        "SELECT * FROM pending_entries \
         WHERE queue_name = $1 AND delivered_at < $2 \
         ORDER BY delivered_at ASC",
    )
    .bind(queue_name)
    .bind(cutoff)
    .fetch_all(pool)
    .await
    .with_context(|| format!("failed to list timed-out entries on queue {queue_name}"))?;

    Ok(rows)
}

/// Reset every `dead` entry on a queue back to `ready` with a fresh attempt
/// counter. An operator-triggered escape hatch, not part of the automatic
/// retry path.
pub async fn revive_dead_letters(pool: &PgPool, queue_name: &str) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE queue_entries \
         SET status = 'ready', attempt = 0, available_at = now() \
         WHERE queue_name = $1 AND status = 'dead'",
    )
    .bind(queue_name)
    .execute(pool)
    .await
    .with_context(|| format!("failed to revive dead letters on queue {queue_name}"))?;

    sqlx::query(
        "DELETE FROM failed_messages WHERE queue_name = $1 AND entry_id IN ( \
             SELECT id FROM queue_entries WHERE queue_name = $1 AND status = 'ready' \
         )",
    )
    .bind(queue_name)
    .execute(pool)
    .await
    .with_context(|| format!("failed to clear quarantine for queue {queue_name}"))?;

    Ok(result.rows_affected())
}

/// Fetch an entry by ID.
pub async fn get_entry(pool: &PgPool, entry_id: Uuid) -> Result<Option<QueueEntry>> {
    let entry = sqlx::query_as::<_, QueueEntry>("SELECT * FROM queue_entries WHERE id = $1")
        .bind(entry_id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch queue entry")?;

    Ok(entry)
}

/// Count entries by status for a queue, used by `corral status`.
pub async fn queue_depth(pool: &PgPool, queue_name: &str) -> Result<Vec<(String, i64)>> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT status::text, COUNT(*) FROM queue_entries \
         WHERE queue_name = $1 \
         GROUP BY status",
    )
    .bind(queue_name)
    .fetch_all(pool)
    .await
    .with_context(|| format!("failed to compute queue depth for {queue_name}"))?;

    Ok(rows)
}

/// List distinct `failed_messages` rows for a queue, most recent first.
pub async fn list_failed_messages(pool: &PgPool, queue_name: &str) -> Result<Vec<FailedMessage>> {
    let rows = sqlx::query_as::<_, FailedMessage>(
        "SELECT * FROM failed_messages WHERE queue_name = $1 ORDER BY failed_at DESC",
    )
    .bind(queue_name)
    .fetch_all(pool)
    .await
    .with_context(|| format!("failed to list failed messages for {queue_name}"))?;

    Ok(rows)
}
