//! Concrete [`QueueHandler`] implementations: one per well-known queue,
//! wrapping the C4-C9 reconciliation functions. A handler's `handle` parses
//! whatever resource reference its queue's payload carries, runs the
//! matching reconciliation step, and enqueues whatever downstream work that
//! step's outcome implies -- the same "handler decides what to enqueue
//! next" shape the orchestrator used for plan-task fan-out.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::PgPool;
use uuid::Uuid;

use corral_db::models::OwnerKind;
use corral_db::queries::{devices as device_db, fleets as fleet_db};

use crate::dispatch::QueueHandler;
use crate::liveness;
use crate::matcher;
use crate::queue::QueueProvider;
use crate::render::{ForbiddenRoots, ProviderRegistry};
use crate::repo;
use crate::rollout;
use crate::validator::{self, ValidationOutcome};

fn require_uuid(payload: &Value, field: &str) -> anyhow::Result<Uuid> {
    let raw = payload
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow::anyhow!("payload missing {field:?}"))?;
    Uuid::parse_str(raw).map_err(|e| anyhow::anyhow!("payload {field:?} is not a UUID: {e}"))
}

/// `fleet-selector-match`: recompute device ownership for an org.
pub struct FleetSelectorMatchHandler {
    pool: PgPool,
}

impl FleetSelectorMatchHandler {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueueHandler for FleetSelectorMatchHandler {
    fn queue_name(&self) -> &'static str {
        "fleet-selector-match"
    }

    async fn handle(&self, payload: Value) -> anyhow::Result<()> {
        let org_id = require_uuid(&payload, "orgId")?;
        let summary = matcher::reconcile_org(&self.pool, org_id).await?;
        tracing::info!(org_id = %org_id, devices = summary.devices_scanned, owners_changed = summary.owners_changed, "selector match complete");
        Ok(())
    }
}

/// `fleet-validate`: validate a fleet's template and, on success, hand off
/// to `template-version-populate` so every owned device gets rolled out.
pub struct FleetValidateHandler {
    pool: PgPool,
    queue: QueueProvider,
}

impl FleetValidateHandler {
    pub fn new(pool: PgPool, queue: QueueProvider) -> Self {
        Self { pool, queue }
    }
}

#[async_trait]
impl QueueHandler for FleetValidateHandler {
    fn queue_name(&self) -> &'static str {
        "fleet-validate"
    }

    async fn handle(&self, payload: Value) -> anyhow::Result<()> {
        let fleet_id = require_uuid(&payload, "fleetId")?;
        let fleet = fleet_db::get_fleet(&self.pool, fleet_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("fleet {fleet_id} not found"))?;

        let outcome = validator::validate_fleet(&self.pool, &fleet).await?;
        if let ValidationOutcome::Valid { template_version_name, .. } = &outcome {
            tracing::info!(fleet_id = %fleet_id, template_version = %template_version_name, "fleet validated");
            self.queue
                .enqueue("template-version-populate", json!({ "fleetId": fleet_id }))
                .await?;
        }
        Ok(())
    }
}

/// `template-version-populate`: the fleet's newest TemplateVersion is
/// frozen; enqueue a rollout for every device the fleet currently owns.
pub struct TemplateVersionPopulateHandler {
    pool: PgPool,
    queue: QueueProvider,
}

impl TemplateVersionPopulateHandler {
    pub fn new(pool: PgPool, queue: QueueProvider) -> Self {
        Self { pool, queue }
    }
}

#[async_trait]
impl QueueHandler for TemplateVersionPopulateHandler {
    fn queue_name(&self) -> &'static str {
        "template-version-populate"
    }

    async fn handle(&self, payload: Value) -> anyhow::Result<()> {
        let fleet_id = require_uuid(&payload, "fleetId")?;
        let fleet = fleet_db::get_fleet(&self.pool, fleet_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("fleet {fleet_id} not found"))?;

        let devices = device_db::list_devices(&self.pool, fleet.org_id).await?;
        let mut enqueued = 0usize;
        for device in devices {
            if device.owner_kind == Some(OwnerKind::Fleet) && device.owner_fleet_id == Some(fleet_id) {
                self.queue
                    .enqueue("fleet-rollout", json!({ "deviceId": device.id }))
                    .await?;
                enqueued += 1;
            }
        }
        tracing::info!(fleet_id = %fleet_id, devices = enqueued, "rollout fanned out");
        Ok(())
    }
}

/// `fleet-rollout`: assign one device to its fleet's latest TemplateVersion.
pub struct FleetRolloutHandler {
    pool: PgPool,
    queue: QueueProvider,
}

impl FleetRolloutHandler {
    pub fn new(pool: PgPool, queue: QueueProvider) -> Self {
        Self { pool, queue }
    }
}

#[async_trait]
impl QueueHandler for FleetRolloutHandler {
    fn queue_name(&self) -> &'static str {
        "fleet-rollout"
    }

    async fn handle(&self, payload: Value) -> anyhow::Result<()> {
        let device_id = require_uuid(&payload, "deviceId")?;
        rollout::rollout_device(&self.pool, &self.queue, device_id).await?;
        Ok(())
    }
}

/// `device-render`: resolve a device's desired TemplateVersion into files.
pub struct DeviceRenderHandler {
    pool: PgPool,
    registry: Arc<ProviderRegistry>,
    forbidden_roots: ForbiddenRoots,
}

impl DeviceRenderHandler {
    pub fn new(pool: PgPool, registry: Arc<ProviderRegistry>, forbidden_roots: ForbiddenRoots) -> Self {
        Self { pool, registry, forbidden_roots }
    }
}

#[async_trait]
impl QueueHandler for DeviceRenderHandler {
    fn queue_name(&self) -> &'static str {
        "device-render"
    }

    async fn handle(&self, payload: Value) -> anyhow::Result<()> {
        let device_id = require_uuid(&payload, "deviceId")?;
        crate::render::render_device(&self.pool, &self.registry, &self.forbidden_roots, device_id).await?;
        Ok(())
    }
}

/// `repo-update`: either poll one repository (payload carries
/// `repositoryId`) or, for a self-generated tick (empty payload), sweep
/// every repository whose poll interval has elapsed.
pub struct RepoUpdateHandler {
    pool: PgPool,
    queue: QueueProvider,
}

impl RepoUpdateHandler {
    pub fn new(pool: PgPool, queue: QueueProvider) -> Self {
        Self { pool, queue }
    }
}

#[async_trait]
impl QueueHandler for RepoUpdateHandler {
    fn queue_name(&self) -> &'static str {
        "repo-update"
    }

    async fn handle(&self, payload: Value) -> anyhow::Result<()> {
        match payload.get("repositoryId").and_then(Value::as_str) {
            Some(raw) => {
                let repository_id = Uuid::parse_str(raw)?;
                repo::poll_repository(&self.pool, &self.queue, repository_id).await?;
            }
            None => {
                repo::poll_due_repositories(&self.pool, &self.queue).await?;
            }
        }
        Ok(())
    }
}

/// `device-disconnected`: a periodic tick driving the liveness sweep.
pub struct DeviceDisconnectedHandler {
    pool: PgPool,
    timeout: chrono::Duration,
}

impl DeviceDisconnectedHandler {
    pub fn new(pool: PgPool, timeout: chrono::Duration) -> Self {
        Self { pool, timeout }
    }
}

#[async_trait]
impl QueueHandler for DeviceDisconnectedHandler {
    fn queue_name(&self) -> &'static str {
        "device-disconnected"
    }

    async fn handle(&self, _payload: Value) -> anyhow::Result<()> {
        let summary = liveness::sweep(&self.pool, self.timeout, chrono::Utc::now()).await?;
        if summary.newly_disconnected > 0 {
            tracing::info!(newly_disconnected = summary.newly_disconnected, "liveness sweep");
        }
        Ok(())
    }
}

/// `alert-export`: a periodic tick driving one alert-exporter pass.
pub struct AlertExportHandler {
    pool: PgPool,
    client: reqwest::Client,
    alertmanager_url: String,
}

impl AlertExportHandler {
    pub fn new(pool: PgPool, client: reqwest::Client, alertmanager_url: String) -> Self {
        Self { pool, client, alertmanager_url }
    }
}

#[async_trait]
impl QueueHandler for AlertExportHandler {
    fn queue_name(&self) -> &'static str {
        "alert-export"
    }

    async fn handle(&self, _payload: Value) -> anyhow::Result<()> {
        crate::alerts::run_pass(&self.pool, &self.client, &self.alertmanager_url).await?;
        Ok(())
    }
}

/// Build the full set of handlers the dispatcher knows about, one per
/// queue in [`super::QUEUE_NAMES`].
pub fn default_handlers(
    pool: PgPool,
    queue: QueueProvider,
    registry: Arc<ProviderRegistry>,
    forbidden_roots: ForbiddenRoots,
    http_client: reqwest::Client,
    alertmanager_url: String,
    liveness_timeout: chrono::Duration,
) -> Vec<Arc<dyn QueueHandler>> {
    vec![
        Arc::new(FleetSelectorMatchHandler::new(pool.clone())),
        Arc::new(FleetValidateHandler::new(pool.clone(), queue.clone())),
        Arc::new(TemplateVersionPopulateHandler::new(pool.clone(), queue.clone())),
        Arc::new(FleetRolloutHandler::new(pool.clone(), queue.clone())),
        Arc::new(DeviceRenderHandler::new(pool.clone(), registry, forbidden_roots)),
        Arc::new(RepoUpdateHandler::new(pool.clone(), queue)),
        Arc::new(DeviceDisconnectedHandler::new(pool.clone(), liveness_timeout)),
        Arc::new(AlertExportHandler::new(pool, http_client, alertmanager_url)),
    ]
}
