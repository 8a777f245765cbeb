//! tallyd: the tally server.
//!
//! Configuration resolution and backend assembly live here so the binaries
//! and integration tests share them.

pub mod config;

use anyhow::Context;
use tracing::info;

use tally_store::{FileSnapshot, MemStore, PgStore, SnapshotPolicy, Storage};

pub use config::{Cli, ServerConfig};

/// Open every configured backend. Does not restore.
pub async fn open_storage(config: &ServerConfig) -> anyhow::Result<Storage> {
    let mut storage = Storage::new(MemStore::new());

    if let Some(path) = &config.file_storage_path {
        let policy = SnapshotPolicy::from_interval(config.store_interval);
        info!(path = %path.display(), ?policy, "file backend enabled");
        storage = storage.with_file(FileSnapshot::new(path), policy);
    }

    if let Some(dsn) = &config.database_dsn {
        let db = PgStore::connect(dsn)
            .await
            .context("connecting to postgres")?;
        storage = storage.with_database(db);
    }

    Ok(storage)
}

/// Open backends and, when enabled, load the persisted state.
pub async fn open_and_restore(config: &ServerConfig) -> anyhow::Result<Storage> {
    let storage = open_storage(config).await?;
    if config.restore {
        storage.restore().await.context("restoring state")?;
    }
    Ok(storage)
}
