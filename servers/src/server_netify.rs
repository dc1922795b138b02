//! # Netify Ingest Server
//!
//! Long-running daemon that accepts TCP connections from router-resident
//! Netify agents and persists their flow and stats telemetry.
//!
//! ## Startup sequence:
//! 1. Load `.env`, parse CLI/environment, merge with the JSON5 config file.
//! 2. Install logging (console plus rotated file output).
//! 3. Build storage (`postgres` by default, `memory` for dry runs) and
//!    bootstrap the schema and the `default` zone.
//! 4. Bind the listener. A bind failure ends the process with an error.
//! 5. Run the acceptor and the counter reporter until Ctrl-C or SIGTERM.

mod netify_logic;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use lib_netify::ingest::{FlowListener, IngestCounters, Ingestor};
use lib_netify::loggers::init_logging;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::netify_logic::config::{Cli, load_config};
use crate::netify_logic::{monitor, storage};

const APP_NAME: &str = "server_netify";

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let loaded = load_config(&cli)?;
    let config = loaded.config;

    // Keep the guard alive so buffered file output is flushed on exit.
    let _log_guard = init_logging(APP_NAME, &config.log).context("Failed to initialise logging")?;
    match &loaded.source {
        Some(path) => info!("Loaded configuration from {}", path.display()),
        None => info!("No config file found, using defaults and environment/CLI values"),
    }
    for entry in &loaded.rejected {
        warn!(table = entry.table, key = %entry.key, "Dropped invalid mapping entry: {}", entry);
    }
    info!("{}", config);

    let repos = storage::build_repositories(loaded.storage, &config.database).await?;
    let counters = Arc::new(IngestCounters::new());
    let ingestor = Arc::new(Ingestor::new(&config, repos, counters.clone()));

    if let Err(e) = ingestor.bootstrap().await {
        // The fallback path provisions the zone lazily, so startup continues.
        warn!(error = %e, "Default zone bootstrap failed");
    }

    let addr = config.listen_addr()?;
    let listener = FlowListener::bind(addr, ingestor.clone())
        .await
        .inspect_err(|e| error!("{}", e))?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let listener_handle = tokio::spawn(listener.run(shutdown_tx.subscribe()));
    let monitor_handle = tokio::spawn(monitor::run(
        counters.clone(),
        config.report_interval_secs,
        shutdown_tx.subscribe(),
    ));

    shutdown_signal().await;
    info!("Shutdown signal received, stopping.");
    let _ = shutdown_tx.send(());

    if let Err(e) = listener_handle.await {
        error!("Listener task failed: {}", e);
    }
    if let Err(e) = monitor_handle.await {
        error!("Monitor task failed: {}", e);
    }

    let snapshot = counters.snapshot();
    info!(
        flows = snapshot.flows_persisted,
        stats = snapshot.stats_persisted,
        failures = snapshot.failures(),
        "Server shut down."
    );
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
