//! Fleet selector matcher (C4): keeps device ownership consistent with
//! fleet label selectors and surfaces multi-owner / overlapping-selector
//! conflicts as conditions and events.
//!
//! Follows the query-module-returns-rows / core-module-holds-the-algorithm
//! split used throughout this crate (`corral_db::queries::*` for rows,
//! `corral_core::*` for reconciliation logic).

use std::collections::{HashMap, HashSet};

use serde_json::{json, Value};
use sqlx::PgPool;
use uuid::Uuid;

use corral_db::models::{Condition, ConditionStatus, Device, Fleet, OwnerKind};
use corral_db::queries::{devices as device_db, events as event_db, fleets as fleet_db};

const COND_MULTI_OWNER: &str = "DeviceMultipleOwners";
const COND_OVERLAPPING: &str = "OverlappingSelectors";
const COND_DECOMMISSIONING: &str = "Decommissioning";

/// Summary of one reconciliation pass, returned for logging/testing.
#[derive(Debug, Default, Clone)]
pub struct MatchSummary {
    pub devices_scanned: usize,
    pub owners_changed: usize,
    pub multi_owner_transitions: usize,
    pub fleets_overlapping: usize,
}

fn conditions_from_value(value: &Value) -> Vec<Condition> {
    serde_json::from_value(value.clone()).unwrap_or_default()
}

fn condition_is_true(conditions: &[Condition], kind: &str) -> bool {
    conditions
        .iter()
        .any(|c| c.kind == kind && c.status == ConditionStatus::True)
}

fn upsert_condition(conditions: &mut Vec<Condition>, condition: Condition) {
    if let Some(existing) = conditions.iter_mut().find(|c| c.kind == condition.kind) {
        *existing = condition;
    } else {
        conditions.push(condition);
    }
}

fn selector_matches(selector: &Value, labels: &Value) -> bool {
    let Some(selector) = selector.as_object() else {
        return false;
    };
    let Some(labels) = labels.as_object() else {
        return false;
    };
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}

fn matching_fleets<'a>(device: &Device, fleets: &'a [Fleet]) -> Vec<&'a Fleet> {
    fleets
        .iter()
        .filter(|f| selector_matches(&f.selector, &device.labels))
        .collect()
}

/// Reconcile device ownership for every device and fleet in an org. Safe to
/// call repeatedly (e.g. once per `FleetSelectorUpdated`/`DeviceLabelsUpdated`
/// event); a no-op pass performs no writes beyond idempotent condition sets.
pub async fn reconcile_org(pool: &PgPool, org_id: Uuid) -> anyhow::Result<MatchSummary> {
    let fleets = fleet_db::list_fleets(pool, org_id).await?;
    let devices = device_db::list_matchable_devices(pool, org_id).await?;

    let mut summary = MatchSummary::default();
    let mut fleet_device_sets: HashMap<Uuid, HashSet<Uuid>> =
        fleets.iter().map(|f| (f.id, HashSet::new())).collect();

    for device in &devices {
        summary.devices_scanned += 1;

        let mut conditions = conditions_from_value(&device.conditions);
        if condition_is_true(&conditions, COND_DECOMMISSIONING) {
            continue;
        }

        let matches = matching_fleets(device, &fleets);
        for fleet in &matches {
            fleet_device_sets.get_mut(&fleet.id).unwrap().insert(device.id);
        }

        let was_multi = condition_is_true(&conditions, COND_MULTI_OWNER);
        let current_owner_fleet = if device.owner_kind == Some(OwnerKind::Fleet) {
            device.owner_fleet_id
        } else {
            None
        };

        match matches.len() {
            0 => {
                if current_owner_fleet.is_some() {
                    reassign_owner(pool, device, None).await?;
                    summary.owners_changed += 1;
                }
                if was_multi {
                    conditions.retain(|c| c.kind != COND_MULTI_OWNER);
                    record_resolution(pool, device.id, "NoMatch", None).await?;
                }
            }
            1 => {
                let fleet = matches[0];
                if current_owner_fleet != Some(fleet.id) {
                    reassign_owner(pool, device, Some(fleet)).await?;
                    summary.owners_changed += 1;
                }
                if was_multi {
                    conditions.retain(|c| c.kind != COND_MULTI_OWNER);
                    record_resolution(pool, device.id, "SingleMatch", Some(&fleet.name)).await?;
                }
            }
            _ => {
                // Owner is left exactly as-is, whether or not it is one of
                // the matching fleets.
                let names: Vec<&str> = matches.iter().map(|f| f.name.as_str()).collect();
                upsert_condition(
                    &mut conditions,
                    Condition {
                        kind: COND_MULTI_OWNER.to_string(),
                        status: ConditionStatus::True,
                        reason: "MultipleSelectorsMatch".to_string(),
                        message: names.join(","),
                        last_transition_time: chrono::Utc::now(),
                    },
                );
                if !was_multi {
                    summary.multi_owner_transitions += 1;
                    event_db::record_event(
                        pool,
                        "Device",
                        device.id,
                        "DeviceMultipleOwnersDetected",
                        &json!({ "matchingFleets": names }),
                    )
                    .await?;
                }
            }
        }

        device_db::set_conditions(pool, device.id, &serde_json::to_value(&conditions)?).await?;
    }

    for fleet in &fleets {
        let overlapping = fleet_device_sets
            .get(&fleet.id)
            .map(|owned| {
                fleet_device_sets
                    .iter()
                    .any(|(other_id, other)| *other_id != fleet.id && !owned.is_disjoint(other))
            })
            .unwrap_or(false);

        let mut conditions = conditions_from_value(&fleet.conditions);
        if overlapping {
            summary.fleets_overlapping += 1;
            upsert_condition(
                &mut conditions,
                Condition {
                    kind: COND_OVERLAPPING.to_string(),
                    status: ConditionStatus::True,
                    reason: "SharesDeviceWithAnotherFleet".to_string(),
                    message: String::new(),
                    last_transition_time: chrono::Utc::now(),
                },
            );
        } else {
            conditions.retain(|c| c.kind != COND_OVERLAPPING);
        }
        fleet_db::set_conditions(pool, fleet.id, &serde_json::to_value(&conditions)?).await?;
    }

    Ok(summary)
}

async fn reassign_owner(
    pool: &PgPool,
    device: &Device,
    fleet: Option<&Fleet>,
) -> anyhow::Result<()> {
    let previous_owner = device.owner_name.clone();
    let new_owner = fleet.map(|f| format!("Fleet/{}", f.name));

    let updated = device_db::set_owner(
        pool,
        device.id,
        fleet.map(|f| (f.id, f.name.as_str())),
        device.resource_version,
    )
    .await?;

    if updated.is_none() {
        // Lost an optimistic-concurrency race; the next trigger will retry.
        return Ok(());
    }

    event_db::record_event(
        pool,
        "Device",
        device.id,
        "ResourceUpdated",
        &json!({
            "updatedFields": ["Owner"],
            "previousOwner": previous_owner,
            "newOwner": new_owner,
        }),
    )
    .await?;
    Ok(())
}

async fn record_resolution(
    pool: &PgPool,
    device_id: Uuid,
    resolution_type: &str,
    assigned_owner: Option<&str>,
) -> anyhow::Result<()> {
    event_db::record_event(
        pool,
        "Device",
        device_id,
        "DeviceMultipleOwnersResolved",
        &json!({
            "resolutionType": resolution_type,
            "assignedOwner": assigned_owner,
        }),
    )
    .await?;
    Ok(())
}
