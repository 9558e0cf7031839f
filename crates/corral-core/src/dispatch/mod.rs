//! The task dispatcher (C3): one consumer per well-known queue, each
//! claiming entries and handing them to the matching reconciliation
//! handler, plus a maintenance loop that reclaims timed-out deliveries and
//! advances each queue's checkpoint.
//!
//! Grounded on the orchestrator's semaphore-bounded spawn loop and
//! cancellation-aware drain, generalized from "one task per DAG-ready plan
//! task" to "one long-lived consumer per queue".

mod handler;
pub mod handlers;

pub use handler::QueueHandler;

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use corral_db::queries::events as event_db;

use crate::error::CorralError;
use crate::queue::{CheckpointManager, QueueProvider};

/// The eight queues the dispatcher knows how to consume, in the order the
/// fleet-management pipeline's stages run: selector matching before
/// validation, validation before rollout, rollout before render.
pub const QUEUE_NAMES: [&str; 8] = [
    "fleet-selector-match",
    "fleet-validate",
    "template-version-populate",
    "fleet-rollout",
    "device-render",
    "repo-update",
    "device-disconnected",
    "alert-export",
];

/// Queues with no natural producer other than the passage of time: a
/// ticker self-enqueues an empty payload on an interval so the normal
/// claim/ack/retry machinery drives them, the same as any other queue.
pub const TICKED_QUEUES: [&str; 3] = ["repo-update", "device-disconnected", "alert-export"];

/// Dispatcher tuning. Defaults mirror the queue's own pending-timeout scale.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// How long a consumer sleeps after finding an empty queue before
    /// polling again.
    pub poll_interval: Duration,
    /// Wall time budget for a single handler invocation. Exceeding it is
    /// treated as a handler failure and goes through the normal
    /// retry/backoff path.
    pub handler_timeout: Duration,
    /// How often the maintenance loop reclaims timed-out deliveries and
    /// advances checkpoints, per queue.
    pub maintenance_interval: Duration,
    /// How often each of [`TICKED_QUEUES`] gets a fresh self-enqueued tick.
    pub tick_interval: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            handler_timeout: Duration::from_secs(120),
            maintenance_interval: Duration::from_secs(10),
            tick_interval: Duration::from_secs(60),
        }
    }
}

/// Outcome of running the dispatcher to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherResult {
    /// The cancellation token fired and every consumer drained cleanly.
    Interrupted,
}

async fn consumer_loop(
    pool: PgPool,
    queue: QueueProvider,
    handler: Arc<dyn QueueHandler>,
    consumer_id: String,
    config: DispatcherConfig,
    cancel: CancellationToken,
) {
    let queue_name = handler.queue_name();
    loop {
        if cancel.is_cancelled() {
            return;
        }

        let claimed = queue.claim(queue_name, &consumer_id).await;
        let entry = match claimed {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(config.poll_interval) => continue,
                }
            }
            Err(err) => {
                error!(queue = queue_name, error = %err, "failed to claim entry");
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(config.poll_interval) => continue,
                }
            }
        };

        let outcome = tokio::time::timeout(config.handler_timeout, handler.handle(entry.payload.clone())).await;
        let result = match outcome {
            Ok(result) => result,
            Err(_) => Err(CorralError::HandlerTimeout {
                queue_name: queue_name.to_string(),
                timeout_secs: config.handler_timeout.as_secs(),
            }
            .into()),
        };

        match result {
            Ok(()) => {
                if let Err(err) = queue.ack(entry.id).await {
                    error!(queue = queue_name, entry_id = %entry.id, error = %err, "failed to ack entry");
                }
            }
            Err(err) => {
                let error_message = err.to_string();
                if let Err(event_err) = event_db::record_event(
                    &pool,
                    "QueueEntry",
                    entry.id,
                    "InternalTaskFailed",
                    &serde_json::json!({ "taskType": queue_name, "errorMessage": error_message }),
                )
                .await
                {
                    error!(queue = queue_name, entry_id = %entry.id, error = %event_err, "failed to record InternalTaskFailed event");
                }
                if let Err(ack_err) = queue.fail(&entry, &error_message).await {
                    error!(queue = queue_name, entry_id = %entry.id, error = %ack_err, "failed to record handler failure");
                }
            }
        }
    }
}

async fn maintenance_loop(
    queue: QueueProvider,
    checkpoints: CheckpointManager,
    interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }

        for queue_name in QUEUE_NAMES {
            if let Err(err) = queue.reclaim_timed_out(queue_name).await {
                warn!(queue = queue_name, error = %err, "failed to reclaim timed-out entries");
            }
            if let Err(err) = checkpoints.advance(queue_name).await {
                warn!(queue = queue_name, error = %err, "failed to advance checkpoint");
            }
        }
    }
}

async fn ticker_loop(queue: QueueProvider, queue_name: &'static str, interval: Duration, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
        if let Err(err) = queue.enqueue(queue_name, serde_json::json!({})).await {
            warn!(queue = queue_name, error = %err, "failed to enqueue tick");
        }
    }
}

/// Run the dispatcher until `cancel` fires, then drain every consumer and
/// return. Each handler gets its own long-lived consumer task; handlers for
/// queues not present in `handlers` are simply never consumed. Every queue
/// in [`TICKED_QUEUES`] also gets a self-enqueuing ticker task regardless of
/// which handlers were passed, so a lone `device-disconnected` consumer
/// started later still finds work waiting.
pub async fn run_dispatcher(
    pool: PgPool,
    queue: QueueProvider,
    checkpoints: CheckpointManager,
    handlers: Vec<Arc<dyn QueueHandler>>,
    config: DispatcherConfig,
    cancel: CancellationToken,
) -> DispatcherResult {
    let mut tasks = JoinSet::new();

    for handler in handlers {
        let queue_name = handler.queue_name();
        let consumer_id = format!("corral-dispatch-{queue_name}");
        tasks.spawn(consumer_loop(
            pool.clone(),
            queue.clone(),
            handler,
            consumer_id,
            config.clone(),
            cancel.clone(),
        ));
    }

    for queue_name in TICKED_QUEUES {
        tasks.spawn(ticker_loop(queue.clone(), queue_name, config.tick_interval, cancel.clone()));
    }

    tasks.spawn(maintenance_loop(
        queue.clone(),
        checkpoints.clone(),
        config.maintenance_interval,
        cancel.clone(),
    ));

    cancel.cancelled().await;
    while tasks.join_next().await.is_some() {}

    DispatcherResult::Interrupted
}
