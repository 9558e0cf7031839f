//! `corral fleet put/get/list/delete`: seed and inspect fleets, standing in
//! for the out-of-scope HTTP API.

use anyhow::{Context, Result};
use clap::Subcommand;
use sqlx::PgPool;
use uuid::Uuid;

use corral_db::queries::fleets as fleet_db;

#[derive(Subcommand)]
pub enum FleetCommands {
    /// Create or update a fleet's selector and template.
    Put {
        /// Fleet name, unique within the org.
        name: String,
        /// Label selector as `key=value` pairs (a device matches when every
        /// pair is present in its labels).
        #[arg(long = "selector")]
        selector: Vec<String>,
        /// Path to a JSON file holding the fleet template (the
        /// `spec.config` provider list).
        #[arg(long = "template-file")]
        template_file: String,
    },
    /// Show a single fleet by name.
    Get {
        /// Fleet name.
        name: String,
    },
    /// List every fleet in the org.
    List,
    /// Delete a fleet by name.
    Delete {
        /// Fleet name.
        name: String,
    },
}

fn parse_selector(pairs: &[String]) -> Result<serde_json::Value> {
    let mut map = serde_json::Map::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("invalid selector entry {pair:?}, expected key=value"))?;
        map.insert(key.to_string(), serde_json::Value::String(value.to_string()));
    }
    Ok(serde_json::Value::Object(map))
}

pub async fn run(pool: &PgPool, org_id: Uuid, command: FleetCommands) -> Result<()> {
    match command {
        FleetCommands::Put { name, selector, template_file } => {
            let selector = parse_selector(&selector)?;
            let contents = std::fs::read_to_string(&template_file)
                .with_context(|| format!("failed to read template file {template_file}"))?;
            let template: serde_json::Value = serde_json::from_str(&contents)
                .with_context(|| format!("failed to parse {template_file} as JSON"))?;

            let fleet = fleet_db::upsert_fleet(
                pool,
                org_id,
                &name,
                &serde_json::json!({}),
                &selector,
                &template,
            )
            .await?;
            println!("Fleet {} ({})", fleet.name, fleet.id);
            println!("  resourceVersion: {}", fleet.resource_version);
        }
        FleetCommands::Get { name } => {
            let fleet = fleet_db::get_by_name(pool, org_id, &name)
                .await?
                .with_context(|| format!("fleet {name:?} not found"))?;
            println!("{}", serde_json::to_string_pretty(&fleet)?);
        }
        FleetCommands::List => {
            let fleets = fleet_db::list_fleets(pool, org_id).await?;
            if fleets.is_empty() {
                println!("No fleets found.");
                return Ok(());
            }
            println!("{:<38} {:<24} {:<10}", "ID", "NAME", "RV");
            println!("{}", "-".repeat(74));
            for fleet in &fleets {
                println!("{:<38} {:<24} {:<10}", fleet.id, fleet.name, fleet.resource_version);
            }
        }
        FleetCommands::Delete { name } => {
            let fleet = fleet_db::get_by_name(pool, org_id, &name)
                .await?
                .with_context(|| format!("fleet {name:?} not found"))?;
            fleet_db::delete_fleet(pool, fleet.id).await?;
            println!("Deleted fleet {name}.");
        }
    }
    Ok(())
}
