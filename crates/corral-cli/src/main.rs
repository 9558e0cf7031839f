mod config;
mod device_cmd;
mod dispatch_cmd;
mod fleet_cmd;
mod queue_cmd;
mod repository_cmd;
mod status_cmd;

use clap::{Parser, Subcommand};
use uuid::Uuid;

use corral_db::pool;

use config::CorralConfig;

#[derive(Parser)]
#[command(name = "corral", about = "Fleet-management control plane task pipeline")]
struct Cli {
    /// Database URL (overrides CORRAL_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Organization ID most subcommands operate within. Defaults to the
    /// nil UUID, which is fine for single-tenant/demo use.
    #[arg(long, global = true)]
    org: Option<Uuid>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a corral config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = "postgresql://localhost:5432/corral")]
        db_url: String,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Initialize the corral database (requires config file or env vars)
    DbInit,
    /// Device seed/inspection commands (stand-in for the HTTP API)
    Device {
        #[command(subcommand)]
        command: device_cmd::DeviceCommands,
    },
    /// Fleet seed/inspection commands (stand-in for the HTTP API)
    Fleet {
        #[command(subcommand)]
        command: fleet_cmd::FleetCommands,
    },
    /// Repository seed/inspection commands (stand-in for the HTTP API)
    Repository {
        #[command(subcommand)]
        command: repository_cmd::RepositoryCommands,
    },
    /// Boot the task dispatcher: one consumer per queue, until signalled
    Dispatch {
        /// Restrict to these queues (default: all well-known queues)
        #[arg(long = "queue")]
        queues: Vec<String>,
        /// Alertmanager v2 API base URL
        #[arg(long, default_value = "http://localhost:9093")]
        alertmanager_url: String,
        /// Heartbeat timeout before a device is marked disconnected, in seconds
        #[arg(long, default_value_t = 300)]
        liveness_timeout_secs: i64,
    },
    /// Queue operator escape hatches: retry dead letters, reclaim timeouts
    Queue {
        #[command(subcommand)]
        command: queue_cmd::QueueCommands,
    },
    /// Print queue depth, in-flight count, and checkpoint watermark
    Status {
        /// Queue name (omit to summarize every queue)
        queue: Option<String>,
    },
}

/// Execute the `corral init` command: write config file.
fn cmd_init(db_url: &str, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile {
        database: config::DatabaseSection { url: db_url.to_string() },
        queue: corral_core::config::QueueConfig::default(),
        service: corral_core::config::ServiceConfig::default(),
        kv: corral_core::config::KvConfig::default(),
    };

    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    println!();
    println!("Next: run `corral db-init` to create and migrate the database.");

    Ok(())
}

/// Execute the `corral db-init` command: create database and run migrations.
async fn cmd_db_init(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let resolved = CorralConfig::resolve(cli_db_url)?;

    println!("Initializing corral database...");

    pool::ensure_database_exists(&resolved.db_config).await?;
    let db_pool = pool::create_pool(&resolved.db_config).await?;

    let migrations_path = pool::default_migrations_path();
    pool::run_migrations(&db_pool, migrations_path).await?;

    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    db_pool.close().await;

    println!("corral db-init complete.");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let org_id = cli.org.unwrap_or(Uuid::nil());

    match cli.command {
        Commands::Init { db_url, force } => {
            cmd_init(&db_url, force)?;
        }
        Commands::DbInit => {
            cmd_db_init(cli.database_url.as_deref()).await?;
        }
        Commands::Device { command } => {
            let resolved = CorralConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = device_cmd::run(&db_pool, org_id, command).await;
            db_pool.close().await;
            result?;
        }
        Commands::Fleet { command } => {
            let resolved = CorralConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = fleet_cmd::run(&db_pool, org_id, command).await;
            db_pool.close().await;
            result?;
        }
        Commands::Repository { command } => {
            let resolved = CorralConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = repository_cmd::run(&db_pool, org_id, command).await;
            db_pool.close().await;
            result?;
        }
        Commands::Dispatch { queues, alertmanager_url, liveness_timeout_secs } => {
            let resolved = CorralConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let queue = corral_core::queue::initialize(db_pool.clone(), resolved.queue_config.clone());
            let result = dispatch_cmd::run_dispatch(
                &db_pool,
                &queue,
                &queues,
                &alertmanager_url,
                liveness_timeout_secs,
                &resolved.service_config,
            )
            .await;
            db_pool.close().await;
            result?;
        }
        Commands::Queue { command } => {
            let resolved = CorralConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let queue = corral_core::queue::initialize(db_pool.clone(), resolved.queue_config.clone());
            let result = queue_cmd::run(&queue, command).await;
            db_pool.close().await;
            result?;
        }
        Commands::Status { queue: queue_name } => {
            let resolved = CorralConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let queue = corral_core::queue::initialize(db_pool.clone(), resolved.queue_config.clone());
            let result = status_cmd::run_status(&db_pool, &queue, queue_name.as_deref()).await;
            db_pool.close().await;
            result?;
        }
    }

    Ok(())
}
