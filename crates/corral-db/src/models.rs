use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Kind of repository a [`Repository`] row polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RepositoryKind {
    Git,
    Http,
    OciRegistry,
}

impl fmt::Display for RepositoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Git => "git",
            Self::Http => "http",
            Self::OciRegistry => "oci_registry",
        };
        f.write_str(s)
    }
}

impl FromStr for RepositoryKind {
    type Err = RepositoryKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "git" => Ok(Self::Git),
            "http" => Ok(Self::Http),
            "oci_registry" => Ok(Self::OciRegistry),
            other => Err(RepositoryKindParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`RepositoryKind`] string.
#[derive(Debug, Clone)]
pub struct RepositoryKindParseError(pub String);

impl fmt::Display for RepositoryKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid repository kind: {:?}", self.0)
    }
}

impl std::error::Error for RepositoryKindParseError {}

// ---------------------------------------------------------------------------

/// Status of a row in the durable queue stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum QueueEntryStatus {
    /// Produced, not yet delivered to any consumer.
    Ready,
    /// Delivered to a consumer; tracked in `pending_entries` until acked.
    Delivered,
    /// Acked by its consumer. Terminal.
    Completed,
    /// Exhausted its retry budget. Terminal, quarantined in `failed_messages`.
    Dead,
}

impl fmt::Display for QueueEntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ready => "ready",
            Self::Delivered => "delivered",
            Self::Completed => "completed",
            Self::Dead => "dead",
        };
        f.write_str(s)
    }
}

impl FromStr for QueueEntryStatus {
    type Err = QueueEntryStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ready" => Ok(Self::Ready),
            "delivered" => Ok(Self::Delivered),
            "completed" => Ok(Self::Completed),
            "dead" => Ok(Self::Dead),
            other => Err(QueueEntryStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`QueueEntryStatus`] string.
#[derive(Debug, Clone)]
pub struct QueueEntryStatusParseError(pub String);

impl fmt::Display for QueueEntryStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid queue entry status: {:?}", self.0)
    }
}

impl std::error::Error for QueueEntryStatusParseError {}

// ---------------------------------------------------------------------------

/// Status of a condition entry, following the usual True/False/Unknown shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// A single observed condition on a [`Device`] or [`Fleet`]. Stored as an
/// element of the row's `conditions` JSONB array, not as its own table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub kind: String,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Row structs -- control-plane resources
// ---------------------------------------------------------------------------

/// Kind of a [`Device`]'s owner reference. Only `Fleet`-owned devices are
/// reassigned by the selector matcher; `User`-owned devices are pinned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "PascalCase")]
#[serde(rename_all = "PascalCase")]
pub enum OwnerKind {
    Fleet,
    User,
}

impl fmt::Display for OwnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Fleet => "Fleet",
            Self::User => "User",
        };
        f.write_str(s)
    }
}

/// A managed device.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Device {
    pub id: Uuid,
    pub org_id: Uuid,
    pub name: String,
    pub labels: serde_json::Value,
    /// Set together with `owner_name`; `Some(Fleet)` keeps `owner_fleet_id`
    /// in sync for the FK join, `Some(User)` leaves it `None`.
    pub owner_kind: Option<OwnerKind>,
    pub owner_name: Option<String>,
    pub owner_fleet_id: Option<Uuid>,
    pub conditions: serde_json::Value,
    pub desired_template_version_id: Option<Uuid>,
    pub rendered_template_version_id: Option<Uuid>,
    pub rendered_hash: Option<String>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub resource_version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A fleet: a selector over devices plus the template applied to them.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Fleet {
    pub id: Uuid,
    pub org_id: Uuid,
    pub name: String,
    pub labels: serde_json::Value,
    pub selector: serde_json::Value,
    pub template: serde_json::Value,
    pub conditions: serde_json::Value,
    pub resource_version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An immutable, validated snapshot of a fleet's template.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TemplateVersion {
    pub id: Uuid,
    pub fleet_id: Uuid,
    pub name: String,
    pub template: serde_json::Value,
    pub valid: bool,
    pub validation_errors: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A polled configuration source (git/http/OCI distribution).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Repository {
    pub id: Uuid,
    pub org_id: Uuid,
    pub name: String,
    pub kind: RepositoryKind,
    pub url: String,
    pub credential_ref: Option<String>,
    pub poll_interval_secs: i32,
    pub conditions: serde_json::Value,
    pub last_polled_at: Option<DateTime<Utc>>,
    pub last_hash: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An append-only audit record of a control-plane event.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Event {
    pub id: i64,
    pub resource_type: String,
    pub resource_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Row structs -- durable queue substrate
// ---------------------------------------------------------------------------

/// A row in the append-only queue stream.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct QueueEntry {
    pub id: Uuid,
    pub queue_name: String,
    pub payload: serde_json::Value,
    pub status: QueueEntryStatus,
    pub attempt: i32,
    pub enqueued_at: DateTime<Utc>,
    pub available_at: DateTime<Utc>,
}

/// A delivered-but-unacked entry, tracked for timeout reclamation.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PendingEntry {
    pub entry_id: Uuid,
    pub queue_name: String,
    pub consumer_id: String,
    pub delivered_at: DateTime<Utc>,
}

/// A quarantined message that exhausted its retry budget.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FailedMessage {
    pub entry_id: Uuid,
    pub queue_name: String,
    pub fail_count: i32,
    pub last_error: String,
    pub failed_at: DateTime<Utc>,
}

/// The in-flight set used by the checkpoint manager's prefix scan.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InFlightTask {
    pub entry_id: Uuid,
    pub queue_name: String,
    pub enqueued_at: DateTime<Utc>,
    pub completed: bool,
}

/// The global, monotonic watermark for one queue.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct QueueCheckpoint {
    pub queue_name: String,
    pub watermark: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Generic per-consumer replay checkpoint (used by the alert exporter).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ConsumerCheckpoint {
    pub consumer_name: String,
    pub checkpoint: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repository_kind_display_roundtrip() {
        let variants = [
            RepositoryKind::Git,
            RepositoryKind::Http,
            RepositoryKind::OciRegistry,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: RepositoryKind = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn repository_kind_invalid() {
        assert!("ftp".parse::<RepositoryKind>().is_err());
    }

    #[test]
    fn queue_entry_status_display_roundtrip() {
        let variants = [
            QueueEntryStatus::Ready,
            QueueEntryStatus::Delivered,
            QueueEntryStatus::Completed,
            QueueEntryStatus::Dead,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: QueueEntryStatus = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn queue_entry_status_invalid() {
        assert!("bogus".parse::<QueueEntryStatus>().is_err());
    }

    #[test]
    fn condition_serializes_pascal_case_status() {
        let c = Condition {
            kind: "Ready".to_string(),
            status: ConditionStatus::True,
            reason: "AllGood".to_string(),
            message: "fine".to_string(),
            last_transition_time: Utc::now(),
        };
        let v = serde_json::to_value(&c).unwrap();
        assert_eq!(v["status"], "True");
    }
}
