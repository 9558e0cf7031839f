//! `corral queue retry/reclaim`: operator escape hatches for stuck queues.

use anyhow::Result;
use clap::Subcommand;

use corral_core::dispatch::QUEUE_NAMES;
use corral_core::queue::QueueProvider;

#[derive(Subcommand)]
pub enum QueueCommands {
    /// Reset every dead-lettered entry on a queue back to ready.
    Retry {
        /// Queue name.
        queue: String,
    },
    /// Requeue every entry whose delivery has exceeded the pending timeout.
    Reclaim {
        /// Queue name.
        queue: String,
    },
}

fn check_known(name: &str) -> Result<()> {
    if !QUEUE_NAMES.contains(&name) {
        anyhow::bail!("unknown queue {name:?}; known queues: {}", QUEUE_NAMES.join(", "));
    }
    Ok(())
}

pub async fn run(queue: &QueueProvider, command: QueueCommands) -> Result<()> {
    match command {
        QueueCommands::Retry { queue: name } => {
            check_known(&name)?;
            let revived = queue.revive_dead_letters(&name).await?;
            println!("Revived {revived} dead-lettered entries on {name}.");
        }
        QueueCommands::Reclaim { queue: name } => {
            check_known(&name)?;
            let reclaimed = queue.reclaim_timed_out(&name).await?;
            println!("Reclaimed {reclaimed} timed-out entries on {name}.");
        }
    }
    Ok(())
}
