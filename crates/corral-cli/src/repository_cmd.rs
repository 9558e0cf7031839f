//! `corral repository put/get/list/delete`: seed and inspect repositories,
//! standing in for the out-of-scope HTTP API.

use anyhow::{Context, Result};
use clap::Subcommand;
use sqlx::PgPool;
use uuid::Uuid;

use corral_db::models::RepositoryKind;
use corral_db::queries::repositories as repo_db;

#[derive(Subcommand)]
pub enum RepositoryCommands {
    /// Create or update a repository's polling configuration.
    Put {
        /// Repository name, unique within the org.
        name: String,
        /// Repository kind: git, http, or oci_registry.
        #[arg(long)]
        kind: String,
        /// Repository URL.
        #[arg(long)]
        url: String,
        /// Opaque reference into the credential store.
        #[arg(long)]
        credential_ref: Option<String>,
        /// Poll interval in seconds.
        #[arg(long, default_value_t = 300)]
        poll_interval_secs: i32,
    },
    /// Show a single repository by name.
    Get {
        /// Repository name.
        name: String,
    },
    /// List every repository in the org.
    List,
    /// Delete a repository by name.
    Delete {
        /// Repository name.
        name: String,
    },
}

pub async fn run(pool: &PgPool, org_id: Uuid, command: RepositoryCommands) -> Result<()> {
    match command {
        RepositoryCommands::Put { name, kind, url, credential_ref, poll_interval_secs } => {
            let kind: RepositoryKind = kind
                .parse()
                .map_err(|e: corral_db::models::RepositoryKindParseError| anyhow::anyhow!(e))?;
            let repo = repo_db::upsert_repository(
                pool,
                org_id,
                &name,
                kind,
                &url,
                credential_ref.as_deref(),
                poll_interval_secs,
            )
            .await?;
            println!("Repository {} ({})", repo.name, repo.id);
            println!("  kind: {}", repo.kind);
            println!("  pollIntervalSecs: {}", repo.poll_interval_secs);
        }
        RepositoryCommands::Get { name } => {
            let repo = repo_db::get_by_name(pool, org_id, &name)
                .await?
                .with_context(|| format!("repository {name:?} not found"))?;
            println!("{}", serde_json::to_string_pretty(&repo)?);
        }
        RepositoryCommands::List => {
            let repos = repo_db::list_repositories(pool, org_id).await?;
            if repos.is_empty() {
                println!("No repositories found.");
                return Ok(());
            }
            println!("{:<38} {:<20} {:<12} {:<30}", "ID", "NAME", "KIND", "URL");
            println!("{}", "-".repeat(104));
            for repo in &repos {
                println!("{:<38} {:<20} {:<12} {:<30}", repo.id, repo.name, repo.kind, repo.url);
            }
        }
        RepositoryCommands::Delete { name } => {
            let repo = repo_db::get_by_name(pool, org_id, &name)
                .await?
                .with_context(|| format!("repository {name:?} not found"))?;
            repo_db::delete_repository(pool, repo.id).await?;
            println!("Deleted repository {name}.");
        }
    }
    Ok(())
}
