//! tallyd: the tally server daemon.
//!
//! Assembles the in-memory store, the optional snapshot file and Postgres
//! mirror, and the HTTP API.
//!
//! # Usage
//!
//! ```text
//! tallyd -a :8080 -f /var/lib/tally/metrics.json -i 300 -r
//! ```

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use tally_api::{ApiConfig, build_router};
use tally_core::init_tracing;
use tally_store::SnapshotPolicy;
use tallyd::{Cli, ServerConfig, open_and_restore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::resolve(Cli::parse())?;
    init_tracing(config.log_format);

    info!(
        address = %config.address,
        file = ?config.file_storage_path,
        database = config.database_dsn.is_some(),
        store_interval = ?config.store_interval,
        restore = config.restore,
        "tallyd starting"
    );

    // ── Storage ────────────────────────────────────────────────

    let storage = open_and_restore(&config).await?;

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let snapshot_handle = {
        let storage = storage.clone();
        tokio::spawn(async move { storage.run_snapshots(shutdown_rx).await })
    };

    // ── API server ─────────────────────────────────────────────

    let router = build_router(
        storage.clone(),
        ApiConfig {
            request_timeout: config.request_timeout,
        },
    );
    let listener = tokio::net::TcpListener::bind(&config.address)
        .await
        .with_context(|| format!("binding {}", config.address))?;
    info!(addr = %listener.local_addr()?, "API server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    // Periodic mode writes its final snapshot from the loop itself.
    let _ = snapshot_handle.await;
    if storage.snapshot_policy() == Some(SnapshotPolicy::Synchronous) {
        storage.flush().await;
    }

    info!("tallyd stopped");
    Ok(())
}

/// Resolves on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
