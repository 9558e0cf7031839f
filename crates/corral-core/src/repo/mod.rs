//! Repository poller (C8): periodically probes each repository for
//! accessibility, updates its `Accessible` condition, and on a transition
//! fans out `fleet-validate`/`device-render` to everything that references
//! it.

use corral_db::models::{Condition, ConditionStatus, Repository, RepositoryKind};
use corral_db::queries::{devices as device_db, fleets as fleet_db, repositories as repo_db};
use serde_json::Value;
use sqlx::PgPool;
use tokio::process::Command;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::CorralError;
use crate::queue::QueueProvider;
use crate::render::providers::oci;
use crate::render::schema::FleetTemplate;

const COND_ACCESSIBLE: &str = "Accessible";

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

/// Outcome of probing one repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// No change in accessibility since the last poll.
    Unchanged,
    /// Became accessible; fan-out was triggered.
    BecameAccessible { fanned_out_fleets: usize, fanned_out_devices: usize },
    /// Became inaccessible; fan-out was triggered.
    BecameInaccessible { fanned_out_fleets: usize, fanned_out_devices: usize, error: String },
}

async fn probe_git(repo: &Repository) -> anyhow::Result<()> {
    let output = Command::new("git")
        .args(["ls-remote", "--exit-code"])
        .arg(&repo.url)
        .output()
        .await
        .map_err(|e| anyhow::anyhow!("failed to run git ls-remote for {:?}: {e}", repo.url))?;

    if !output.status.success() {
        anyhow::bail!("git ls-remote against {:?} failed: {}", repo.url, String::from_utf8_lossy(&output.stderr));
    }
    Ok(())
}

async fn probe_http(repo: &Repository) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    let mut request = client.head(&repo.url);
    if let Some(credential) = &repo.credential_ref {
        request = request.bearer_auth(credential);
    }
    request.send().await?.error_for_status()?;
    Ok(())
}

async fn probe_oci_registry(repo: &Repository) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    oci::probe_v2(&client, &repo.url, repo.credential_ref.as_deref()).await
}

async fn probe(repo: &Repository) -> anyhow::Result<()> {
    match repo.kind {
        RepositoryKind::Git => probe_git(repo).await,
        RepositoryKind::Http => probe_http(repo).await,
        RepositoryKind::OciRegistry => probe_oci_registry(repo).await,
    }
}

/// Whether a fleet's template references `repo_name` in any provider entry.
fn fleet_references(template: &serde_json::Value, repo_name: &str) -> bool {
    let Ok(parsed) = serde_json::from_value::<FleetTemplate>(template.clone()) else {
        return false;
    };
    parsed.spec.config.iter().any(|c| c.repository_name() == Some(repo_name))
}

/// Fan out re-validation/re-render to everything referencing this
/// repository. Devices are driven through their fleet's template rather
/// than their own resolved config, since only fleets carry provider lists.
async fn fan_out(pool: &PgPool, queue: &QueueProvider, org_id: Uuid, repo_name: &str) -> anyhow::Result<(usize, usize)> {
    let fleets = fleet_db::list_fleets(pool, org_id).await?;
    let referencing: Vec<Uuid> = fleets
        .iter()
        .filter(|f| fleet_references(&f.template, repo_name))
        .map(|f| f.id)
        .collect();

    for fleet_id in &referencing {
        queue
            .enqueue("fleet-validate", serde_json::json!({ "fleetId": fleet_id }))
            .await?;
    }

    let devices = device_db::list_devices(pool, org_id).await?;
    let affected_devices: Vec<Uuid> = devices
        .iter()
        .filter(|d| d.owner_fleet_id.is_some_and(|id| referencing.contains(&id)))
        .map(|d| d.id)
        .collect();

    for device_id in &affected_devices {
        queue
            .enqueue("device-render", serde_json::json!({ "deviceId": device_id }))
            .await?;
    }

    Ok((referencing.len(), affected_devices.len()))
}

/// Probe one repository and update its `Accessible` state, fanning out on
/// any accessible/inaccessible transition.
pub async fn poll_repository(pool: &PgPool, queue: &QueueProvider, repository_id: Uuid) -> anyhow::Result<ProbeOutcome> {
    let repo = repo_db::get_repository(pool, repository_id)
        .await?
        .ok_or(crate::error::CorralError::ResourceNotFound { resource_type: "Repository", id: repository_id })?;

    let was_accessible = repo.last_error.is_none();
    let result = probe(&repo).await;
    let now = chrono::Utc::now();

    match result {
        Ok(()) => {
            repo_db::record_poll_result(pool, repo.id, None, None).await?;
            let mut conditions = conditions_from_value(&repo.conditions);
            upsert_condition(
                &mut conditions,
                Condition {
                    kind: COND_ACCESSIBLE.to_string(),
                    status: ConditionStatus::True,
                    reason: "ProbeSucceeded".to_string(),
                    message: "The repository responded successfully".to_string(),
                    last_transition_time: now,
                },
            );
            repo_db::set_conditions(pool, repo.id, &serde_json::to_value(&conditions)?).await?;

            if was_accessible {
                return Ok(ProbeOutcome::Unchanged);
            }
            let (fleets, devices) = fan_out(pool, queue, repo.org_id, &repo.name).await?;
            info!(repository = %repo.name, fleets, devices, "repository became accessible");
            Ok(ProbeOutcome::BecameAccessible { fanned_out_fleets: fleets, fanned_out_devices: devices })
        }
        Err(e) => {
            let corral_err = CorralError::RepositoryInaccessible { repository_id: repo.id, source: e };
            let message = corral_err.to_string();
            repo_db::record_poll_result(pool, repo.id, None, Some(&message)).await?;

            let mut conditions = conditions_from_value(&repo.conditions);
            upsert_condition(
                &mut conditions,
                Condition {
                    kind: COND_ACCESSIBLE.to_string(),
                    status: ConditionStatus::False,
                    reason: "ProbeFailed".to_string(),
                    message: message.clone(),
                    last_transition_time: now,
                },
            );
            repo_db::set_conditions(pool, repo.id, &serde_json::to_value(&conditions)?).await?;

            if !was_accessible {
                return Ok(ProbeOutcome::Unchanged);
            }
            warn!(repository = %repo.name, error = %message, "repository became inaccessible");
            let (fleets, devices) = fan_out(pool, queue, repo.org_id, &repo.name).await?;
            Ok(ProbeOutcome::BecameInaccessible { fanned_out_fleets: fleets, fanned_out_devices: devices, error: message })
        }
    }
}

/// Poll every repository that is due, per its own `poll_interval_secs`.
pub async fn poll_due_repositories(pool: &PgPool, queue: &QueueProvider) -> anyhow::Result<usize> {
    let due = repo_db::list_due_for_poll(pool).await?;
    let count = due.len();
    for repo in due {
        if let Err(e) = poll_repository(pool, queue, repo.id).await {
            warn!(repository = %repo.name, error = %e, "repository poll failed unexpectedly");
        }
    }
    Ok(count)
}
