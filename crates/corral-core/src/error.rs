//! Distinct, matchable error kinds for the paths that need to branch on
//! *why* something failed rather than on a formatted string.

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum CorralError {
    #[error("no checkpoint recorded for queue {queue_name:?}")]
    CheckpointMissing { queue_name: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("device {device_id} owner changed concurrently (expected resource_version {expected})")]
    OwnerChanged { device_id: Uuid, expected: i64 },

    #[error("render path {path:?} is forbidden")]
    ForbiddenDevicePath { path: String },

    #[error("repository {repository_id} is inaccessible: {source}")]
    RepositoryInaccessible {
        repository_id: Uuid,
        #[source]
        source: anyhow::Error,
    },

    #[error("handler for queue {queue_name:?} timed out after {timeout_secs}s")]
    HandlerTimeout { queue_name: String, timeout_secs: u64 },

    #[error("entry {entry_id} permanently failed after {attempts} attempts")]
    PermanentlyFailed { entry_id: Uuid, attempts: i32 },

    #[error("{resource_type} {id} not found")]
    ResourceNotFound { resource_type: &'static str, id: Uuid },
}
