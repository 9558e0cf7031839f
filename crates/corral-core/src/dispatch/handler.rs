//! The per-queue handler trait implemented by each reconciliation loop
//! (C4-C9), grounded on the teacher's object-safe async-trait harness.

use async_trait::async_trait;
use serde_json::Value;

/// One of the eight well-known queues the dispatcher consumes.
#[async_trait]
pub trait QueueHandler: Send + Sync {
    /// The queue name this handler consumes, e.g. `"fleet-validate"`.
    fn queue_name(&self) -> &'static str;

    /// Process one entry's payload. An `Err` return triggers the queue
    /// provider's retry/backoff path; `Ok` acks the entry.
    async fn handle(&self, payload: Value) -> anyhow::Result<()>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn QueueHandler) {}
};
