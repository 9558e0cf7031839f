//! Liveness poller (C9a): on a fixed cadence, marks any device whose
//! heartbeat has lapsed as disconnected, and clears that state again once a
//! heartbeat is received.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use corral_db::models::{Condition, ConditionStatus};
use corral_db::queries::devices as device_db;
use corral_db::queries::events as event_db;

const COND_DISCONNECTED: &str = "Disconnected";

fn conditions_from_value(value: &Value) -> Vec<Condition> {
    serde_json::from_value(value.clone()).unwrap_or_default()
}

fn upsert_condition(conditions: &mut Vec<Condition>, condition: Condition) {
    if let Some(existing) = conditions.iter_mut().find(|c| c.kind == condition.kind) {
        *existing = condition;
    } else {
        conditions.push(condition);
    }
}

/// Summary of one liveness sweep.
#[derive(Debug, Default, Clone, Copy)]
pub struct LivenessSummary {
    pub devices_checked: usize,
    pub newly_disconnected: usize,
}

/// Mark every device whose `last_seen_at` is at or before `now - timeout`
/// as disconnected, unless it's already flagged. Cutoff ties (`now -
/// lastSeen == timeout`) count as disconnected.
pub async fn sweep(pool: &PgPool, timeout: chrono::Duration, now: DateTime<Utc>) -> anyhow::Result<LivenessSummary> {
    let cutoff = now - timeout;
    let candidates = device_db::list_stale_devices(pool, cutoff).await?;

    let mut summary = LivenessSummary::default();
    for device in &candidates {
        summary.devices_checked += 1;

        let mut conditions = conditions_from_value(&device.conditions);
        let already_disconnected = conditions
            .iter()
            .any(|c| c.kind == COND_DISCONNECTED && c.status == ConditionStatus::True);
        if already_disconnected {
            continue;
        }

        upsert_condition(
            &mut conditions,
            Condition {
                kind: COND_DISCONNECTED.to_string(),
                status: ConditionStatus::True,
                reason: "HeartbeatTimeout".to_string(),
                message: "The device is disconnected".to_string(),
                last_transition_time: now,
            },
        );
        device_db::set_conditions(pool, device.id, &serde_json::to_value(&conditions)?).await?;
        event_db::record_event(pool, "Device", device.id, "DeviceDisconnected", &serde_json::json!({})).await?;
        summary.newly_disconnected += 1;
    }

    if summary.newly_disconnected > 0 {
        info!(count = summary.newly_disconnected, "devices marked disconnected");
    }
    Ok(summary)
}

/// Record a device heartbeat: touches `last_seen_at` and, if the device was
/// flagged `Disconnected`, clears the condition and emits `DeviceConnected`.
/// Returns whether this heartbeat reconnected a previously-disconnected
/// device.
pub async fn record_heartbeat(pool: &PgPool, device_id: Uuid, now: DateTime<Utc>) -> anyhow::Result<bool> {
    device_db::touch_last_seen(pool, device_id).await?;

    let device = device_db::get_device(pool, device_id)
        .await?
        .ok_or_else(|| crate::error::CorralError::ResourceNotFound { resource_type: "Device", id: device_id })?;

    let mut conditions = conditions_from_value(&device.conditions);
    let was_disconnected = conditions
        .iter()
        .any(|c| c.kind == COND_DISCONNECTED && c.status == ConditionStatus::True);
    if !was_disconnected {
        return Ok(false);
    }

    upsert_condition(
        &mut conditions,
        Condition {
            kind: COND_DISCONNECTED.to_string(),
            status: ConditionStatus::False,
            reason: "HeartbeatReceived".to_string(),
            message: "The device reconnected".to_string(),
            last_transition_time: now,
        },
    );
    device_db::set_conditions(pool, device_id, &serde_json::to_value(&conditions)?).await?;
    event_db::record_event(pool, "Device", device_id, "DeviceConnected", &serde_json::json!({})).await?;
    info!(device_id = %device_id, "device reconnected");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_condition_replaces_existing_kind() {
        let mut conditions = vec![Condition {
            kind: COND_DISCONNECTED.to_string(),
            status: ConditionStatus::False,
            reason: "old".to_string(),
            message: "old".to_string(),
            last_transition_time: Utc::now(),
        }];
        upsert_condition(
            &mut conditions,
            Condition {
                kind: COND_DISCONNECTED.to_string(),
                status: ConditionStatus::True,
                reason: "HeartbeatTimeout".to_string(),
                message: "The device is disconnected".to_string(),
                last_transition_time: Utc::now(),
            },
        );
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].status, ConditionStatus::True);
    }
}
