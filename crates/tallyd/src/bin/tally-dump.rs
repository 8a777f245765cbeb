//! tally-dump: print stored records straight from the durable backends.
//!
//! ```text
//! tally-dump -f /tmp/metrics-db.json PollCount:counter Alloc:gauge
//! ```
//!
//! One JSON line per matching record on stdout. No server is started and
//! no records are written.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tally_core::{Metric, MetricKey};
use tally_store::{FileSnapshot, PgStore};

#[derive(Parser, Debug)]
#[command(name = "tally-dump", version, about = "Print stored tally metrics")]
struct Cli {
    /// Snapshot file to scan
    #[arg(short = 'f', long, env = "FILE_STORAGE_PATH")]
    file_storage_path: Option<PathBuf>,

    /// Postgres connection string to query
    #[arg(short = 'd', long, env = "DATABASE_DSN")]
    database_dsn: Option<String>,

    /// Keys to print, as `id:type`
    #[arg(required = true)]
    keys: Vec<MetricKey>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let file = cli
        .file_storage_path
        .filter(|p| !p.as_os_str().is_empty());
    let dsn = cli.database_dsn.filter(|d| !d.trim().is_empty());
    if file.is_none() && dsn.is_none() {
        bail!("nothing to read: pass -f and/or -d");
    }

    let mut records: Vec<Metric> = Vec::new();
    if let Some(path) = file {
        let snapshot = FileSnapshot::new(&path);
        records.extend(
            snapshot
                .filter(&cli.keys)
                .await
                .with_context(|| format!("reading {}", path.display()))?,
        );
    }
    if let Some(dsn) = dsn {
        let db = PgStore::connect(&dsn).await.context("connecting to postgres")?;
        records.extend(db.filter(&cli.keys).await.context("querying postgres")?);
    }

    let mut out = std::io::stdout().lock();
    for m in &records {
        serde_json::to_writer(&mut out, m)?;
        writeln!(out)?;
    }
    Ok(())
}
