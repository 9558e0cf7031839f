//! `corral dispatch` command: boot the task dispatcher -- one consumer per
//! queue, plus the maintenance and ticker loops -- until interrupted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use corral_core::config::ServiceConfig;
use corral_core::dispatch::{self, handlers, DispatcherConfig, DispatcherResult, QUEUE_NAMES};
use corral_core::queue::{CheckpointManager, QueueProvider};
use corral_core::render::{ForbiddenRoots, ProviderRegistry};

/// Run the dispatch command.
///
/// `queues` restricts which queues get a consumer; an empty slice means
/// every queue in [`QUEUE_NAMES`]. Queues outside that set are rejected.
pub async fn run_dispatch(
    pool: &PgPool,
    queue: &QueueProvider,
    queues: &[String],
    alertmanager_url: &str,
    liveness_timeout_secs: i64,
    _service_config: &ServiceConfig,
) -> Result<()> {
    for name in queues {
        if !QUEUE_NAMES.contains(&name.as_str()) {
            anyhow::bail!("unknown queue {name:?}; known queues: {}", QUEUE_NAMES.join(", "));
        }
    }

    let registry = Arc::new(ProviderRegistry::with_defaults());
    let forbidden_roots = ForbiddenRoots::new([std::path::PathBuf::from("/var/lib/corral")]);
    let http_client = reqwest::Client::new();
    let liveness_timeout = chrono::Duration::seconds(liveness_timeout_secs);

    let all_handlers = handlers::default_handlers(
        pool.clone(),
        queue.clone(),
        registry,
        forbidden_roots,
        http_client,
        alertmanager_url.to_string(),
        liveness_timeout,
    );

    let selected: Vec<_> = if queues.is_empty() {
        all_handlers
    } else {
        all_handlers
            .into_iter()
            .filter(|h| queues.iter().any(|q| q == h.queue_name()))
            .collect()
    };

    println!("Dispatching {} queue(s):", selected.len());
    for handler in &selected {
        println!("  - {}", handler.queue_name());
    }

    let checkpoints = CheckpointManager::new(pool.clone());

    // First Ctrl+C drains in-flight work cleanly; a second force-exits.
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    let got_first_signal = Arc::new(AtomicBool::new(false));
    let got_first_clone = Arc::clone(&got_first_signal);

    tokio::spawn(async move {
        loop {
            tokio::signal::ctrl_c().await.ok();
            if got_first_clone.swap(true, Ordering::SeqCst) {
                eprintln!("\nForce exit.");
                std::process::exit(130);
            }
            eprintln!("\nShutting down gracefully (Ctrl+C again to force)...");
            cancel_clone.cancel();
        }
    });

    let result = dispatch::run_dispatcher(
        pool.clone(),
        queue.clone(),
        checkpoints,
        selected,
        DispatcherConfig::default(),
        cancel,
    )
    .await;

    match result {
        DispatcherResult::Interrupted => {
            println!("\nDispatcher interrupted. In-flight entries drained.");
        }
    }

    Ok(())
}
