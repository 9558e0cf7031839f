//! The durable queue provider (C1): produce, claim, ack, retry-with-backoff,
//! timeout reclamation, and permanent-failure quarantine, modeled on Redis
//! Streams semantics but implemented against Postgres.

use chrono::Utc;
use serde_json::Value;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use corral_db::models::QueueEntry;
use corral_db::queries::queue as queue_db;

use crate::config::QueueConfig;
use crate::error::CorralError;
use crate::queue::backoff::backoff_delay;

/// What happened to an entry after its handler reported failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Requeued for another attempt after a backoff delay.
    Retried,
    /// Retry budget exhausted; quarantined in `failed_messages`.
    Dead,
    /// The entry was no longer `delivered` (already acked or otherwise
    /// resolved by the time this failure was reported); no-op.
    AlreadyResolved,
}

/// The durable queue provider. Cheap to clone (wraps a pool handle);
/// intended to be constructed once per process and shared.
#[derive(Clone)]
pub struct QueueProvider {
    pool: PgPool,
    config: QueueConfig,
}

impl QueueProvider {
    pub fn new(pool: PgPool, config: QueueConfig) -> Self {
        Self { pool, config }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Append a new entry to a queue.
    pub async fn enqueue(&self, queue_name: &str, payload: Value) -> anyhow::Result<QueueEntry> {
        let entry = queue_db::enqueue(&self.pool, queue_name, &payload).await?;
        info!(queue = queue_name, entry_id = %entry.id, "enqueued");
        Ok(entry)
    }

    /// Claim the oldest ready entry on a queue for a named consumer.
    pub async fn claim(
        &self,
        queue_name: &str,
        consumer_id: &str,
    ) -> anyhow::Result<Option<QueueEntry>> {
        queue_db::claim_next(&self.pool, queue_name, consumer_id).await
    }

    /// Acknowledge successful processing.
    pub async fn ack(&self, entry_id: Uuid) -> anyhow::Result<()> {
        queue_db::ack(&self.pool, entry_id).await?;
        info!(entry_id = %entry_id, "acked");
        Ok(())
    }

    /// Report a handler failure for an entry. Retries with backoff until
    /// `config.max_retries` is exhausted, then quarantines the entry.
    ///
    /// A no-op (returns [`FailureOutcome::AlreadyResolved`]) if the entry is
    /// no longer `delivered` -- e.g. a concurrent `ack` won the race.
    pub async fn fail(&self, entry: &QueueEntry, error: &str) -> anyhow::Result<FailureOutcome> {
        if entry.attempt as u32 >= self.config.max_retries {
            let Some(_) = queue_db::mark_dead(&self.pool, entry.id, error).await? else {
                return Ok(FailureOutcome::AlreadyResolved);
            };
            warn!(entry_id = %entry.id, queue = %entry.queue_name, attempts = entry.attempt + 1, "entry permanently failed");
            return Ok(FailureOutcome::Dead);
        }

        let delay = backoff_delay(&self.config, entry.attempt as u32);
        let next_available_at = Utc::now() + delay;
        let Some(_) = queue_db::requeue(&self.pool, entry.id, next_available_at).await? else {
            return Ok(FailureOutcome::AlreadyResolved);
        };
        warn!(entry_id = %entry.id, queue = %entry.queue_name, delay_ms = delay.as_millis() as u64, "entry requeued for retry");
        Ok(FailureOutcome::Retried)
    }

    /// Scan for entries whose delivery has exceeded the pending timeout and
    /// requeue (or quarantine) each one, exactly as [`fail`] would for a
    /// handler-reported failure. Returns the number of entries reclaimed.
    pub async fn reclaim_timed_out(&self, queue_name: &str) -> anyhow::Result<usize> {
        let cutoff = Utc::now()
            - chrono::Duration::seconds(self.config.pending_timeout_secs as i64);
        let timed_out = queue_db::list_timed_out(&self.pool, queue_name, cutoff).await?;

        let mut reclaimed = 0usize;
        for pending in &timed_out {
            let Some(entry) = queue_db::get_entry(&self.pool, pending.entry_id).await? else {
                continue;
            };
            // The snapshot above can be stale by the time we act on it --
            // skip entries a concurrent ack already resolved rather than
            // resurrecting completed work.
            if self.fail(&entry, "reclaimed after pending timeout").await? == FailureOutcome::AlreadyResolved {
                continue;
            }
            reclaimed += 1;
        }

        if reclaimed > 0 {
            info!(queue = queue_name, count = reclaimed, "reclaimed timed-out entries");
        }
        Ok(reclaimed)
    }

    /// Operator escape hatch: reset every dead-lettered entry on a queue
    /// back to ready with a fresh attempt counter.
    pub async fn revive_dead_letters(&self, queue_name: &str) -> anyhow::Result<u64> {
        queue_db::revive_dead_letters(&self.pool, queue_name).await
    }

    pub async fn depth(&self, queue_name: &str) -> anyhow::Result<Vec<(String, i64)>> {
        queue_db::queue_depth(&self.pool, queue_name).await
    }

    pub async fn list_failed(&self, queue_name: &str) -> anyhow::Result<Vec<corral_db::models::FailedMessage>> {
        queue_db::list_failed_messages(&self.pool, queue_name).await
    }
}

impl From<&QueueEntry> for CorralError {
    fn from(entry: &QueueEntry) -> Self {
        CorralError::PermanentlyFailed {
            entry_id: entry.id,
            attempts: entry.attempt,
        }
    }
}
