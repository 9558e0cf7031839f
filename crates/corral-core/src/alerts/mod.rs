//! Alert exporter (C9b): replays the event stream from a durable
//! `AlertCheckpoint`, maintains active-alert state keyed by
//! `(resource, alertname)`, and POSTs the delta to an Alertmanager v2
//! endpoint. The checkpoint only advances after a successful POST, so a
//! failed delivery resends on the next pass -- safe because alert identity
//! is stable and upserts are idempotent.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use corral_db::queries::{checkpoint as checkpoint_db, events as event_db};

const CONSUMER_NAME: &str = "alert-exporter";
const CURRENT_ALERT_CHECKPOINT_VERSION: u32 = 1;
const EVENT_BATCH_SIZE: i64 = 500;

const ALERTING_SUFFIXES: [&str; 3] = ["Critical", "Warning", "Error"];
const CLEARING_SUFFIXES: [&str; 2] = ["Normal", "Healthy"];

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ActiveAlert {
    resource: Uuid,
    alertname: String,
    labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
    starts_at: DateTime<Utc>,
}

/// The durable cursor and live alert set, persisted as one
/// `consumer_checkpoints` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AlertCheckpoint {
    version: u32,
    last_event_id: i64,
    alerts: Vec<ActiveAlert>,
}

impl Default for AlertCheckpoint {
    fn default() -> Self {
        Self { version: CURRENT_ALERT_CHECKPOINT_VERSION, last_event_id: 0, alerts: Vec::new() }
    }
}

async fn load_checkpoint(pool: &PgPool) -> anyhow::Result<AlertCheckpoint> {
    let Some(row) = checkpoint_db::get_consumer_checkpoint(pool, CONSUMER_NAME).await? else {
        return Ok(AlertCheckpoint::default());
    };

    match serde_json::from_value::<AlertCheckpoint>(row.checkpoint) {
        Ok(checkpoint) => Ok(checkpoint),
        Err(e) => {
            warn!(error = %e, "alert checkpoint was corrupt, restarting from empty state");
            Ok(AlertCheckpoint::default())
        }
    }
}

async fn store_checkpoint(pool: &PgPool, checkpoint: &AlertCheckpoint) -> anyhow::Result<()> {
    checkpoint_db::put_consumer_checkpoint(pool, CONSUMER_NAME, &serde_json::to_value(checkpoint)?).await
}

/// `Some(base)` if `reason` names an alert-raising condition (e.g.
/// `DeviceCPUCritical` -> base `DeviceCPU`).
fn alerting_base(reason: &str) -> Option<&str> {
    ALERTING_SUFFIXES.iter().find_map(|suffix| reason.strip_suffix(suffix)).or(if reason == "DeviceDisconnected" {
        Some("DeviceConnectivity")
    } else {
        None
    })
}

/// `Some(base)` if `reason` names the corresponding clear condition (e.g.
/// `DeviceCPUNormal` -> base `DeviceCPU`).
fn clearing_base(reason: &str) -> Option<&str> {
    CLEARING_SUFFIXES.iter().find_map(|suffix| reason.strip_suffix(suffix)).or(if reason == "DeviceConnected" {
        Some("DeviceConnectivity")
    } else {
        None
    })
}

fn reason_base(reason: &str) -> Option<&str> {
    ALERTING_SUFFIXES
        .iter()
        .chain(CLEARING_SUFFIXES.iter())
        .find_map(|suffix| reason.strip_suffix(suffix))
        .or(if reason == "DeviceDisconnected" || reason == "DeviceConnected" { Some("DeviceConnectivity") } else { None })
}

#[derive(Debug, Clone, Serialize)]
struct AlertmanagerStatus {
    state: &'static str,
}

#[derive(Debug, Clone, Serialize)]
struct AlertmanagerAlert {
    labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
    #[serde(rename = "startsAt")]
    starts_at: DateTime<Utc>,
    #[serde(rename = "endsAt", skip_serializing_if = "Option::is_none")]
    ends_at: Option<DateTime<Utc>>,
    #[serde(rename = "generatorURL")]
    generator_url: String,
    status: AlertmanagerStatus,
}

/// Summary of one alert-exporter pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlertPassSummary {
    pub events_processed: usize,
    pub alerts_upserted: usize,
    pub alerts_cleared: usize,
}

/// Run one pass: replay new events, update the live alert set, and POST the
/// delta to Alertmanager. Returns `Ok` with a zeroed summary (and performs
/// no POST or checkpoint write) if there was nothing new to process.
pub async fn run_pass(pool: &PgPool, client: &reqwest::Client, alertmanager_url: &str) -> anyhow::Result<AlertPassSummary> {
    let mut checkpoint = load_checkpoint(pool).await?;
    let events = event_db::list_since(pool, checkpoint.last_event_id, EVENT_BATCH_SIZE).await?;

    if events.is_empty() {
        return Ok(AlertPassSummary::default());
    }

    let mut alerts: BTreeMap<(Uuid, String), ActiveAlert> =
        checkpoint.alerts.drain(..).map(|a| ((a.resource, a.alertname.clone()), a)).collect();
    let mut delta: Vec<(ActiveAlert, Option<DateTime<Utc>>)> = Vec::new();
    let mut summary = AlertPassSummary::default();

    for event in &events {
        summary.events_processed += 1;

        if event.event_type == "ResourceDeleted" && event.resource_type == "Device" {
            let cleared: Vec<ActiveAlert> = alerts
                .iter()
                .filter(|((resource, _), _)| *resource == event.resource_id)
                .map(|(_, a)| a.clone())
                .collect();
            for alert in cleared {
                alerts.remove(&(alert.resource, alert.alertname.clone()));
                summary.alerts_cleared += 1;
                delta.push((alert, Some(event.recorded_at)));
            }
            continue;
        }

        if alerting_base(&event.event_type).is_some() {
            let key = (event.resource_id, event.event_type.clone());
            let alert = alerts.entry(key).or_insert_with(|| ActiveAlert {
                resource: event.resource_id,
                alertname: event.event_type.clone(),
                labels: BTreeMap::from([
                    ("resource".to_string(), event.resource_id.to_string()),
                    ("alertname".to_string(), event.event_type.clone()),
                ]),
                annotations: BTreeMap::new(),
                starts_at: event.recorded_at,
            });
            summary.alerts_upserted += 1;
            delta.push((alert.clone(), None));
            continue;
        }

        if let Some(base) = clearing_base(&event.event_type) {
            let matching: Vec<String> = alerts
                .keys()
                .filter(|(resource, alertname)| *resource == event.resource_id && reason_base(alertname) == Some(base))
                .map(|(_, alertname)| alertname.clone())
                .collect();
            for alertname in matching {
                if let Some(alert) = alerts.remove(&(event.resource_id, alertname)) {
                    summary.alerts_cleared += 1;
                    delta.push((alert, Some(event.recorded_at)));
                }
            }
        }
    }

    let last_event_id = events.last().map(|e| e.id).unwrap_or(checkpoint.last_event_id);

    if !delta.is_empty() {
        let payload: Vec<AlertmanagerAlert> = delta
            .iter()
            .map(|(alert, ends_at)| AlertmanagerAlert {
                labels: alert.labels.clone(),
                annotations: alert.annotations.clone(),
                starts_at: alert.starts_at,
                ends_at: *ends_at,
                generator_url: format!("corral://device/{}", alert.resource),
                status: AlertmanagerStatus { state: "active" },
            })
            .collect();

        client
            .post(format!("{}/api/v2/alerts", alertmanager_url.trim_end_matches('/')))
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
    }

    checkpoint.last_event_id = last_event_id;
    checkpoint.alerts = alerts.into_values().collect();
    store_checkpoint(pool, &checkpoint).await?;

    info!(
        events = summary.events_processed,
        upserted = summary.alerts_upserted,
        cleared = summary.alerts_cleared,
        "alert exporter pass complete"
    );
    Ok(summary)
}
