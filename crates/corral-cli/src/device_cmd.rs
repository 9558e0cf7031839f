//! `corral device put/get/list/delete`: seed and inspect devices, standing
//! in for the out-of-scope HTTP API.

use anyhow::{Context, Result};
use clap::Subcommand;
use sqlx::PgPool;
use uuid::Uuid;

use corral_db::queries::devices as device_db;

#[derive(Subcommand)]
pub enum DeviceCommands {
    /// Create or update a device's labels.
    Put {
        /// Device name, unique within the org.
        name: String,
        /// Labels as `key=value` pairs.
        #[arg(long = "label")]
        labels: Vec<String>,
    },
    /// Show a single device by name.
    Get {
        /// Device name.
        name: String,
    },
    /// List every device in the org.
    List,
    /// Delete a device by name.
    Delete {
        /// Device name.
        name: String,
    },
}

fn parse_labels(pairs: &[String]) -> Result<serde_json::Value> {
    let mut map = serde_json::Map::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("invalid label {pair:?}, expected key=value"))?;
        map.insert(key.to_string(), serde_json::Value::String(value.to_string()));
    }
    Ok(serde_json::Value::Object(map))
}

pub async fn run(pool: &PgPool, org_id: Uuid, command: DeviceCommands) -> Result<()> {
    match command {
        DeviceCommands::Put { name, labels } => {
            let labels = parse_labels(&labels)?;
            let device = device_db::upsert_device(pool, org_id, &name, &labels).await?;
            println!("Device {} ({})", device.name, device.id);
            println!("  resourceVersion: {}", device.resource_version);
        }
        DeviceCommands::Get { name } => {
            let device = device_db::get_by_name(pool, org_id, &name)
                .await?
                .with_context(|| format!("device {name:?} not found"))?;
            println!("{}", serde_json::to_string_pretty(&device)?);
        }
        DeviceCommands::List => {
            let devices = device_db::list_devices(pool, org_id).await?;
            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }
            println!("{:<38} {:<24} {:<16} {:<10}", "ID", "NAME", "OWNER", "RV");
            println!("{}", "-".repeat(90));
            for device in &devices {
                let owner = match (&device.owner_kind, &device.owner_name) {
                    (Some(kind), Some(name)) => format!("{kind}/{name}"),
                    _ => "-".to_string(),
                };
                println!(
                    "{:<38} {:<24} {:<16} {:<10}",
                    device.id, device.name, owner, device.resource_version
                );
            }
        }
        DeviceCommands::Delete { name } => {
            let device = device_db::get_by_name(pool, org_id, &name)
                .await?
                .with_context(|| format!("device {name:?} not found"))?;
            device_db::delete_device(pool, device.id).await?;
            println!("Deleted device {name}.");
        }
    }
    Ok(())
}
