//! # Remedy Server
//!
//! Thin wrapper binary for running the orchestration daemon as a standalone
//! service.
//!
//! ## Usage
//!
//! ```bash
//! # Run with defaults (in-memory queue and bus)
//! cargo run --bin remedy-server
//!
//! # Run with a config file
//! REMEDY_CONFIG_PATH=config/remedy.toml cargo run --bin remedy-server
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::signal;
use tracing::{error, info};

use remedy_orchestration::pattern_index::PatternIndex;
use remedy_orchestration::supervisor::NoopFastFix;
use remedy_orchestration::Daemon;
use remedy_shared::config::RemedyConfig;
use remedy_shared::logging;
use remedy_shared::messaging::EventBusProvider;
use remedy_shared::queue::TaskQueueProvider;
use remedy_shared::registry::WorkerRegistryProvider;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    logging::init_tracing();

    info!("Starting Remedy Orchestration Server...");
    info!("   Version: {}", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::var("REMEDY_CONFIG_PATH").ok().map(PathBuf::from);
    let config = RemedyConfig::load(config_path.as_deref())
        .context("Failed to load configuration")?;

    // Startup-fatal: a missing startup script would turn every heavy
    // dispatch into a runtime failure
    let script = &config.supervisor.heavy_worker_startup_script;
    if !script.is_file() {
        error!(script = %script.display(), "Heavy worker startup script not found");
        bail!(
            "heavy worker startup script not found: {}",
            script.display()
        );
    }

    let index = match &config.pattern_index_path {
        Some(path) => PatternIndex::load(path)
            .await
            .context("Failed to load pattern index")?,
        None => PatternIndex::empty(),
    };
    let stats = index.stats();
    info!(
        commits = stats.commit_count,
        chunks = stats.chunk_count,
        "Pattern index ready"
    );

    let queue = Arc::new(TaskQueueProvider::new_in_memory());
    let bus = Arc::new(EventBusProvider::new_in_memory());
    let registry = Arc::new(WorkerRegistryProvider::new_in_memory());

    let daemon = Arc::new(Daemon::new(
        config,
        queue,
        bus,
        registry,
        Arc::new(index),
        Arc::new(NoopFastFix::new()),
    ));

    info!("Remedy server started, press Ctrl+C to shut down");

    let run_daemon = daemon.clone();
    let runner = tokio::spawn(async move { run_daemon.run().await });

    shutdown_signal().await;
    info!("Shutdown signal received, initiating graceful shutdown...");

    daemon.cancellation_token().cancel();
    match runner.await {
        Ok(Ok(())) => info!("Daemon stopped"),
        Ok(Err(e)) => error!(error = %e, "Daemon stopped with error"),
        Err(e) => error!(error = %e, "Daemon task panicked"),
    }

    info!("Remedy server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        },
        _ = terminate => {
            info!("Received SIGTERM");
        },
    }
}
