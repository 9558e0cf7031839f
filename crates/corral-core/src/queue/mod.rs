//! The durable queue provider (C1) and checkpoint manager (C2), plus the
//! process-wide singleton wiring the dispatcher and CLI share.

pub mod backoff;
pub mod checkpoint;
pub mod provider;

pub use checkpoint::CheckpointManager;
pub use provider::{FailureOutcome, QueueProvider};

use std::sync::OnceLock;

use sqlx::PgPool;

use crate::config::QueueConfig;

static QUEUE_PROVIDER: OnceLock<QueueProvider> = OnceLock::new();

/// Initialize the process-wide queue provider singleton. Idempotent: a
/// second call is a no-op and returns the handle installed by the first.
///
/// Mirrors the orchestrator's single-entry-point lifecycle: callers obtain
/// the shared handle via [`global`] rather than threading a `QueueProvider`
/// through every function signature.
pub fn initialize(pool: PgPool, config: QueueConfig) -> QueueProvider {
    QUEUE_PROVIDER
        .get_or_init(|| QueueProvider::new(pool, config))
        .clone()
}

/// Fetch the process-wide queue provider singleton.
///
/// # Panics
///
/// Panics if [`initialize`] has not yet been called. This mirrors the
/// "explicit Initialize before use" contract for the singleton: callers
/// that reach for the queue before boot-time initialization have a real
/// ordering bug, not a recoverable error.
pub fn global() -> &'static QueueProvider {
    QUEUE_PROVIDER
        .get()
        .expect("queue provider not initialized; call queue::initialize() at startup")
}
