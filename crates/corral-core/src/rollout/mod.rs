//! Device rollout (C6): assigns a device to the latest valid TemplateVersion
//! for its owning fleet, atomically, with optimistic concurrency.

use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use corral_db::models::{Device, OwnerKind};
use corral_db::queries::{devices as device_db, events as event_db, template_versions as tv_db};

use crate::error::CorralError;
use crate::queue::QueueProvider;

const MAX_RESOURCE_VERSION_RETRIES: u32 = 3;

/// Outcome of attempting to roll out one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RolloutOutcome {
    /// Device already desires the latest valid TemplateVersion.
    NoOp,
    /// Device now desires a new TemplateVersion; render should follow.
    RolledOut { template_version_id: Uuid },
    /// Device has no fleet owner (or a non-Fleet owner); not eligible.
    NotFleetOwned,
    /// The owning fleet has no valid TemplateVersion yet.
    NoValidTemplateVersion,
}

/// Roll out one device to its owning fleet's latest valid TemplateVersion.
///
/// Mirrors the teacher's optimistic-lock retry shape: a `resourceVersion`
/// conflict caused only by a concurrent unrelated write is retried a small
/// bounded number of times; a conflict caused by the owner itself changing
/// is surfaced as [`CorralError::OwnerChanged`] and never retried here --
/// the selector matcher already recomputed ownership and will re-trigger
/// rollout if appropriate.
pub async fn rollout_device(
    pool: &PgPool,
    queue: &QueueProvider,
    device_id: Uuid,
) -> anyhow::Result<RolloutOutcome> {
    let mut device = device_db::get_device(pool, device_id)
        .await?
        .ok_or_else(|| CorralError::ResourceNotFound { resource_type: "Device", id: device_id })?;

    let Some(fleet_id) = fleet_owner(&device) else {
        return Ok(RolloutOutcome::NotFleetOwned);
    };

    let Some(latest) = tv_db::latest_valid(pool, fleet_id).await? else {
        return Ok(RolloutOutcome::NoValidTemplateVersion);
    };

    if device.desired_template_version_id == Some(latest.id) {
        return Ok(RolloutOutcome::NoOp);
    }

    let original_owner = device.owner_fleet_id;

    for _ in 0..=MAX_RESOURCE_VERSION_RETRIES {
        let updated = device_db::set_desired_template_version(
            pool,
            device.id,
            latest.id,
            device.resource_version,
        )
        .await?;

        if let Some(updated) = updated {
            event_db::record_event(
                pool,
                "Device",
                device.id,
                "DeviceContentOutOfDate",
                &json!({ "templateVersion": latest.name }),
            )
            .await?;
            queue
                .enqueue("device-render", json!({ "deviceId": updated.id }))
                .await?;
            return Ok(RolloutOutcome::RolledOut { template_version_id: latest.id });
        }

        device = device_db::get_device(pool, device_id)
            .await?
            .ok_or_else(|| CorralError::ResourceNotFound { resource_type: "Device", id: device_id })?;

        if device.owner_fleet_id != original_owner {
            return Err(CorralError::OwnerChanged {
                device_id,
                expected: device.resource_version,
            }
            .into());
        }
    }

    Err(CorralError::OwnerChanged {
        device_id,
        expected: device.resource_version,
    }
    .into())
}

fn fleet_owner(device: &Device) -> Option<Uuid> {
    if device.owner_kind == Some(OwnerKind::Fleet) {
        device.owner_fleet_id
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fleet_owner_none_for_user_owned_device() {
        let device = Device {
            id: Uuid::nil(),
            org_id: Uuid::nil(),
            name: "d".into(),
            labels: json!({}),
            owner_kind: Some(OwnerKind::User),
            owner_name: Some("alice".into()),
            owner_fleet_id: None,
            conditions: json!([]),
            desired_template_version_id: None,
            rendered_template_version_id: None,
            rendered_hash: None,
            last_seen_at: None,
            resource_version: 1,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        assert_eq!(fleet_owner(&device), None);
    }
}
