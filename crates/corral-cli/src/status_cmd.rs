//! `corral status` command: print per-queue depth, in-flight count, and
//! checkpoint watermark.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use corral_core::dispatch::QUEUE_NAMES;
use corral_core::error::CorralError;
use corral_core::queue::{CheckpointManager, QueueProvider};

/// Run the status command.
///
/// When `queue_name` is `Some`, shows detail for just that queue. When
/// `None`, prints a summary table across every well-known queue.
pub async fn run_status(pool: &PgPool, queue: &QueueProvider, queue_name: Option<&str>) -> Result<()> {
    let checkpoints = CheckpointManager::new(pool.clone());

    match queue_name {
        Some(name) => run_one(queue, &checkpoints, name).await,
        None => run_all(queue, &checkpoints).await,
    }
}

/// A queue that has never advanced has no checkpoint row at all; display
/// that as "(none)" rather than surfacing [`CorralError::CheckpointMissing`]
/// as a command failure.
async fn checkpoint_watermark(checkpoints: &CheckpointManager, name: &str) -> Result<Option<DateTime<Utc>>> {
    match checkpoints.current(name).await {
        Ok(watermark) => Ok(Some(watermark)),
        Err(err) => match err.downcast::<CorralError>() {
            Ok(CorralError::CheckpointMissing { .. }) => Ok(None),
            Ok(other) => Err(other.into()),
            Err(original) => Err(original),
        },
    }
}

async fn run_one(queue: &QueueProvider, checkpoints: &CheckpointManager, name: &str) -> Result<()> {
    let depth = queue.depth(name).await?;
    let watermark = checkpoint_watermark(checkpoints, name).await?;
    let failed = queue.list_failed(name).await?;

    println!("Queue: {name}");
    println!("  depth:");
    for (status, count) in &depth {
        println!("    {status}: {count}");
    }
    match watermark {
        Some(wm) => println!("  checkpoint: {}", wm.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("  checkpoint: (none)"),
    }
    println!("  dead-lettered: {}", failed.len());
    for message in &failed {
        println!(
            "    {} (attempts={}, last_error={:?})",
            message.entry_id, message.fail_count, message.last_error
        );
    }

    Ok(())
}

async fn run_all(queue: &QueueProvider, checkpoints: &CheckpointManager) -> Result<()> {
    println!("{:<28} {:>8} {:>10} {:>6} {:>6} {:<26}", "QUEUE", "READY", "DELIVERED", "DONE", "DEAD", "CHECKPOINT");
    println!("{}", "-".repeat(88));

    for name in QUEUE_NAMES {
        let depth = queue.depth(name).await?;
        let watermark = checkpoint_watermark(checkpoints, name).await?;

        let count = |status: &str| {
            depth.iter().find(|(s, _)| s == status).map(|(_, n)| *n).unwrap_or(0)
        };
        let checkpoint_str = watermark
            .map(|wm| wm.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "(none)".to_string());

        println!(
            "{:<28} {:>8} {:>10} {:>6} {:>6} {:<26}",
            name,
            count("ready"),
            count("delivered"),
            count("completed"),
            count("dead"),
            checkpoint_str,
        );
    }

    Ok(())
}
