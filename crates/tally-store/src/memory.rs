//! In-memory metric map, the arithmetic authority.
//!
//! A single `RwLock<HashMap<MetricKey, MetricValue>>`. Readers (`get`,
//! `list`, `project`) share the lock; writers (`update`, `update_batch`,
//! `commit`, `load`) hold it exclusively, so a reader sees either the
//! pre-state or a fully applied post-state.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use tally_core::{Metric, MetricKey, MetricValue};

/// Authoritative keyed store of current metric state.
///
/// Cheap to clone; clones share the same map.
#[derive(Clone, Default)]
pub struct MemStore {
    metrics: Arc<RwLock<HashMap<MetricKey, MetricValue>>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one update and return the post-update record.
    pub async fn update(&self, metric: Metric) -> Metric {
        let mut metrics = self.metrics.write().await;
        apply(&mut metrics, metric)
    }

    /// Apply updates in order under one writer lock.
    ///
    /// Returns the post-update record for each element, in input order. A key
    /// repeated inside the batch shows its running state at that position.
    pub async fn update_batch(&self, batch: Vec<Metric>) -> Vec<Metric> {
        let mut metrics = self.metrics.write().await;
        let applied: Vec<Metric> = batch
            .into_iter()
            .map(|m| apply(&mut metrics, m))
            .collect();
        debug!(count = applied.len(), "batch applied");
        applied
    }

    /// Post-update record for `metric` without changing the map.
    pub async fn project(&self, metric: &Metric) -> Metric {
        let metrics = self.metrics.read().await;
        let value = match metrics.get(&metric.key()) {
            Some(stored) => stored.apply(metric.value),
            None => metric.value,
        };
        Metric {
            id: metric.id.clone(),
            value,
        }
    }

    /// Post-update records for `batch`, as [`MemStore::update_batch`] would
    /// return them, without changing the map.
    pub async fn project_batch(&self, batch: &[Metric]) -> Vec<Metric> {
        let metrics = self.metrics.read().await;
        let mut pending: HashMap<MetricKey, MetricValue> = HashMap::new();
        batch
            .iter()
            .map(|m| {
                let key = m.key();
                let value = match pending.get(&key).or_else(|| metrics.get(&key)) {
                    Some(stored) => stored.apply(m.value),
                    None => m.value,
                };
                pending.insert(key, value);
                Metric {
                    id: m.id.clone(),
                    value,
                }
            })
            .collect()
    }

    /// Store post-update records as-is, later entries overriding earlier
    /// ones for the same key.
    pub async fn commit(&self, records: &[Metric]) {
        let mut metrics = self.metrics.write().await;
        for m in records {
            metrics.insert(m.key(), m.value);
        }
    }

    pub async fn get(&self, key: &MetricKey) -> Option<Metric> {
        let metrics = self.metrics.read().await;
        metrics.get(key).map(|value| Metric {
            id: key.id.clone(),
            value: *value,
        })
    }

    /// Point-in-time copy of every record, ordered by `(id, type)`.
    pub async fn list(&self) -> Vec<Metric> {
        let metrics = self.metrics.read().await;
        let mut all: Vec<(&MetricKey, &MetricValue)> = metrics.iter().collect();
        all.sort_by(|a, b| a.0.cmp(b.0));
        all.into_iter()
            .map(|(key, value)| Metric {
                id: key.id.clone(),
                value: *value,
            })
            .collect()
    }

    /// Replace the whole state with restored records.
    ///
    /// Records are inserted as-is (no accumulation); a key appearing twice
    /// keeps its last occurrence.
    pub async fn load(&self, restored: Vec<Metric>) {
        let mut metrics = self.metrics.write().await;
        metrics.clear();
        for m in restored {
            metrics.insert(m.key(), m.value);
        }
        debug!(count = metrics.len(), "state loaded");
    }

    pub async fn len(&self) -> usize {
        self.metrics.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.metrics.read().await.is_empty()
    }
}

fn apply(metrics: &mut HashMap<MetricKey, MetricValue>, metric: Metric) -> Metric {
    let key = metric.key();
    let value = match metrics.get(&key) {
        Some(stored) => stored.apply(metric.value),
        None => metric.value,
    };
    metrics.insert(key, value);
    Metric {
        id: metric.id,
        value,
    }
}
