//! Composite storage: the in-memory map plus optional durable backends.
//!
//! Writes are computed by [`MemStore`]. With a database configured the
//! post-update records are upserted first and committed to memory only once
//! the upsert succeeds, so a failed write leaves no trace and the client may
//! resend it. In synchronous snapshot mode the snapshot file is rewritten
//! after every write (errors are logged only).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, warn};

use tally_core::{Metric, MetricKey};

use crate::error::{StoreError, StoreResult};
use crate::file::FileSnapshot;
use crate::memory::MemStore;
use crate::postgres::PgStore;

/// When snapshots are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotPolicy {
    /// A background task writes one snapshot per interval.
    Periodic(Duration),
    /// A snapshot follows every accepted update.
    Synchronous,
}

impl SnapshotPolicy {
    /// `0` means synchronous; anything else is the period.
    pub fn from_interval(interval: Duration) -> Self {
        if interval.is_zero() {
            SnapshotPolicy::Synchronous
        } else {
            SnapshotPolicy::Periodic(interval)
        }
    }
}

/// Where startup state came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreSource {
    File,
    Database,
    /// Nothing to restore from; the store starts empty.
    None,
}

struct Snapshotter {
    file: FileSnapshot,
    policy: SnapshotPolicy,
    /// Held across listing memory and writing the file, so a snapshot is
    /// never overwritten by an older listing.
    capture: Mutex<()>,
}

impl Snapshotter {
    async fn capture(&self, memory: &MemStore) -> StoreResult<usize> {
        let _capture = self.capture.lock().await;
        let records = memory.list().await;
        self.file.write(&records).await?;
        Ok(records.len())
    }
}

/// The server's metric storage. Cheap to clone.
#[derive(Clone)]
pub struct Storage {
    memory: MemStore,
    snapshot: Option<Arc<Snapshotter>>,
    db: Option<PgStore>,
    /// Serializes memory-then-database writes so the mirror sees running
    /// totals in the same order the map produced them.
    write_order: Arc<Mutex<()>>,
}

impl Storage {
    pub fn new(memory: MemStore) -> Self {
        Self {
            memory,
            snapshot: None,
            db: None,
            write_order: Arc::new(Mutex::new(())),
        }
    }

    /// In-memory only storage.
    pub fn in_memory() -> Self {
        Self::new(MemStore::new())
    }

    pub fn with_file(mut self, file: FileSnapshot, policy: SnapshotPolicy) -> Self {
        self.snapshot = Some(Arc::new(Snapshotter {
            file,
            policy,
            capture: Mutex::new(()),
        }));
        self
    }

    pub fn with_database(mut self, db: PgStore) -> Self {
        self.db = Some(db);
        self
    }

    pub fn memory(&self) -> &MemStore {
        &self.memory
    }

    pub fn has_database(&self) -> bool {
        self.db.is_some()
    }

    pub fn snapshot_policy(&self) -> Option<SnapshotPolicy> {
        self.snapshot.as_ref().map(|s| s.policy)
    }

    // ── Writes ─────────────────────────────────────────────────────

    /// Apply one update and mirror the result.
    pub async fn update(&self, metric: Metric) -> StoreResult<Metric> {
        let post = {
            let _order = self.write_order.lock().await;
            match &self.db {
                None => self.memory.update(metric).await,
                Some(db) => {
                    let post = self.memory.project(&metric).await;
                    db.save(std::slice::from_ref(&post)).await?;
                    self.memory.commit(std::slice::from_ref(&post)).await;
                    post
                }
            }
        };
        self.after_write().await;
        Ok(post)
    }

    /// Apply a batch in order and mirror the results.
    pub async fn update_batch(&self, batch: Vec<Metric>) -> StoreResult<Vec<Metric>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        let applied = {
            let _order = self.write_order.lock().await;
            match &self.db {
                None => self.memory.update_batch(batch).await,
                Some(db) => {
                    let applied = self.memory.project_batch(&batch).await;
                    db.save(&applied).await?;
                    self.memory.commit(&applied).await;
                    applied
                }
            }
        };
        self.after_write().await;
        Ok(applied)
    }

    async fn after_write(&self) {
        if let Some(snap) = &self.snapshot {
            if snap.policy == SnapshotPolicy::Synchronous {
                self.snapshot_logged(snap).await;
            }
        }
    }

    // ── Reads ──────────────────────────────────────────────────────

    pub async fn get(&self, key: &MetricKey) -> Option<Metric> {
        self.memory.get(key).await
    }

    pub async fn list(&self) -> Vec<Metric> {
        self.memory.list().await
    }

    /// Database liveness. Fails when no database is configured.
    pub async fn ping(&self) -> StoreResult<()> {
        match &self.db {
            Some(db) => db.ping().await,
            None => Err(StoreError::NotConfigured),
        }
    }

    // ── Durability ─────────────────────────────────────────────────

    /// Load startup state into memory.
    ///
    /// The snapshot file is authoritative when configured; the database is
    /// consulted only when there is no file backend.
    pub async fn restore(&self) -> StoreResult<(RestoreSource, usize)> {
        let (source, records) = if let Some(snap) = &self.snapshot {
            (RestoreSource::File, snap.file.read_all().await?)
        } else if let Some(db) = &self.db {
            (RestoreSource::Database, db.list().await?)
        } else {
            return Ok((RestoreSource::None, 0));
        };
        let count = records.len();
        self.memory.load(records).await;
        info!(?source, count, "state restored");
        Ok((source, count))
    }

    /// Write a snapshot now. Returns the number of records written, or
    /// `None` without a file backend.
    pub async fn snapshot(&self) -> StoreResult<Option<usize>> {
        let Some(snap) = &self.snapshot else {
            return Ok(None);
        };
        snap.capture(&self.memory).await.map(Some)
    }

    async fn snapshot_logged(&self, snap: &Snapshotter) {
        if let Err(e) = snap.capture(&self.memory).await {
            error!(error = %e, path = ?snap.file.path(), "snapshot write failed");
        }
    }

    /// Periodic snapshot loop; returns on shutdown after a final snapshot.
    ///
    /// Returns immediately when there is no file backend or snapshots are
    /// synchronous.
    pub async fn run_snapshots(&self, mut shutdown: watch::Receiver<bool>) {
        let Some(snap) = self.snapshot.clone() else {
            return;
        };
        let SnapshotPolicy::Periodic(interval) = snap.policy else {
            return;
        };
        info!(
            interval_secs = interval.as_secs_f64(),
            path = ?snap.file.path(),
            "snapshot loop started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.snapshot_logged(&snap).await;
                    debug!("periodic snapshot done");
                }
                _ = shutdown.changed() => {
                    info!("snapshot loop shutting down");
                    self.snapshot_logged(&snap).await;
                    break;
                }
            }
        }
    }

    /// Final flush used on shutdown when snapshots are synchronous or
    /// periodic; a no-op without a file backend.
    pub async fn flush(&self) {
        if let Err(e) = self.snapshot().await {
            warn!(error = %e, "final snapshot failed");
        }
    }
}
