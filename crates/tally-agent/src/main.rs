//! tally-agent: the collector binary.
//!
//! ```text
//! tally-agent -a localhost:8080 -p 2s -r 10s
//! ```

use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use tally_agent::alloc::CountingAllocator;
use tally_agent::{Agent, AgentConfig, Cli, HttpTransport};
use tally_core::init_tracing;

#[global_allocator]
static ALLOCATOR: CountingAllocator = CountingAllocator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AgentConfig::resolve(Cli::parse())?;
    init_tracing(config.log_format);

    info!(
        address = %config.address,
        poll = ?config.poll_interval,
        report = ?config.report_interval,
        "tally-agent starting"
    );

    let transport = HttpTransport::new(&config.address, config.request_timeout)?;
    let agent = Agent::new(transport, config.poll_interval, config.report_interval);

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let summary = agent.run(shutdown_rx).await;
    info!(?summary, "tally-agent stopped");
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
