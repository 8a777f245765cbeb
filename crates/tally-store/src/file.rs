//! File snapshot backend.
//!
//! One JSON object per line, one line per metric. Every snapshot rewrites
//! the whole file (truncate, then write); this is not an append log. A crash
//! mid-write can leave a truncated file, which restore reports as corrupt.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::debug;

use tally_core::{Metric, MetricKey};

use crate::error::{StoreError, StoreResult};

/// Attach the snapshot path to an I/O error.
macro_rules! io_err {
    ($path:expr) => {
        |source| StoreError::Io {
            path: $path.to_path_buf(),
            source,
        }
    };
}

/// Snapshot file with serialized access.
pub struct FileSnapshot {
    path: PathBuf,
    /// Held for the duration of any read or write of the file.
    lock: Mutex<()>,
}

impl FileSnapshot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the file contents with `metrics`.
    pub async fn write(&self, metrics: &[Metric]) -> StoreResult<()> {
        let mut buf = Vec::with_capacity(metrics.len() * 64);
        for m in metrics {
            serde_json::to_writer(&mut buf, m)?;
            buf.push(b'\n');
        }

        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(io_err!(parent))?;
        }
        let mut file = tokio::fs::File::create(&self.path)
            .await
            .map_err(io_err!(self.path))?;
        file.write_all(&buf).await.map_err(io_err!(self.path))?;
        file.flush().await.map_err(io_err!(self.path))?;
        file.sync_all().await.map_err(io_err!(self.path))?;

        debug!(path = ?self.path, records = metrics.len(), "snapshot written");
        Ok(())
    }

    /// Read every record. A missing file reads as empty; blank lines are
    /// skipped; any undecodable line fails the whole read.
    pub async fn read_all(&self) -> StoreResult<Vec<Metric>> {
        self.scan(|_| true).await
    }

    /// Records whose `(id, type)` is in `keys`.
    pub async fn filter(&self, keys: &[MetricKey]) -> StoreResult<Vec<Metric>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let wanted: HashSet<&MetricKey> = keys.iter().collect();
        self.scan(|m| wanted.contains(&m.key())).await
    }

    async fn scan(&self, mut keep: impl FnMut(&Metric) -> bool) -> StoreResult<Vec<Metric>> {
        let _guard = self.lock.lock().await;
        let file = match tokio::fs::File::open(&self.path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = ?self.path, "no snapshot file");
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let mut lines = BufReader::new(file).lines();
        let mut records = Vec::new();
        let mut line_no = 0;
        while let Some(line) = lines.next_line().await.map_err(io_err!(self.path))? {
            line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            let metric: Metric =
                serde_json::from_str(&line).map_err(|e| StoreError::Corrupt {
                    path: self.path.clone(),
                    line: line_no,
                    reason: e.to_string(),
                })?;
            if keep(&metric) {
                records.push(metric);
            }
        }
        Ok(records)
    }
}
