//! Postgres mirror of the metric store.
//!
//! The table holds post-update state: upserts replace `delta` rather than
//! adding to it, because accumulation already happened in [`crate::MemStore`].
//!
//! ```sql
//! CREATE TABLE metrics (
//!     id    TEXT NOT NULL,
//!     type  TEXT NOT NULL,
//!     delta BIGINT NULL,
//!     value DOUBLE PRECISION NULL,
//!     PRIMARY KEY (id, type)
//! )
//! ```

use std::collections::HashMap;
use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder};
use tracing::{debug, info};

use tally_core::{Metric, MetricEnvelope, MetricKey, RetrySchedule};

use crate::error::{StoreError, StoreResult};

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS metrics (
    id    TEXT NOT NULL,
    type  TEXT NOT NULL,
    delta BIGINT NULL,
    value DOUBLE PRECISION NULL,
    PRIMARY KEY (id, type)
)";

/// Bound on waiting for a pooled connection. Kept well below the server's
/// request deadline so an unreachable database surfaces as a retriable 500
/// rather than a 408.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(1);

/// Rows per INSERT statement. Four binds per row keeps each statement well
/// under the 65535 parameter limit.
const UPSERT_CHUNK: usize = 1000;

#[derive(Debug, sqlx::FromRow)]
struct MetricRow {
    id: String,
    #[sqlx(rename = "type")]
    kind: String,
    delta: Option<i64>,
    value: Option<f64>,
}

impl TryFrom<MetricRow> for Metric {
    type Error = StoreError;

    fn try_from(row: MetricRow) -> Result<Self, Self::Error> {
        let envelope = MetricEnvelope {
            id: row.id,
            kind: row.kind,
            delta: row.delta,
            value: row.value,
        };
        envelope
            .into_metric()
            .map_err(|e| StoreError::InvalidRow(e.to_string()))
    }
}

/// Pooled Postgres backend. Cheap to clone.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    retry: RetrySchedule,
}

impl PgStore {
    /// Connect, then create the table if it does not exist.
    pub async fn connect(dsn: &str) -> StoreResult<Self> {
        let pool = pool_options().connect(dsn).await?;
        let store = Self::from_pool(pool);
        store.migrate().await?;
        info!("postgres backend connected");
        Ok(store)
    }

    /// Build the pool without connecting or migrating; the first query
    /// opens a connection.
    pub fn connect_lazy(dsn: &str) -> StoreResult<Self> {
        let pool = pool_options().connect_lazy(dsn)?;
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            retry: RetrySchedule::default(),
        }
    }

    /// Override the schedule used for transient failures outside the
    /// request path (migration, restore, `tally-dump` reads).
    pub fn with_retry(mut self, retry: RetrySchedule) -> Self {
        self.retry = retry;
        self
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        self.retry
            .run("create metrics table", StoreError::is_transient, || async move {
                sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
                Ok::<_, StoreError>(())
            })
            .await
    }

    /// Liveness check for `/ping`.
    pub async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Upsert post-update records.
    ///
    /// Runs once, without retrying: it sits on the request path, and a
    /// transient failure is handed back to the client to resend.
    ///
    /// Duplicate keys are collapsed to their last occurrence first: Postgres
    /// refuses an `ON CONFLICT DO UPDATE` that touches the same row twice.
    pub async fn save(&self, metrics: &[Metric]) -> StoreResult<()> {
        let rows = dedupe_last(metrics);
        if rows.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for chunk in rows.chunks(UPSERT_CHUNK) {
            let mut qb: QueryBuilder<Postgres> =
                QueryBuilder::new("INSERT INTO metrics (id, type, delta, value) ");
            qb.push_values(chunk, |mut b, m| {
                b.push_bind(m.id.clone())
                    .push_bind(m.kind().as_str())
                    .push_bind(m.delta())
                    .push_bind(m.gauge_value());
            });
            qb.push(
                " ON CONFLICT (id, type) DO UPDATE SET delta = EXCLUDED.delta, value = EXCLUDED.value",
            );
            qb.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;
        debug!(rows = rows.len(), "metrics upserted");
        Ok(())
    }

    /// Rows matching any of `keys`.
    pub async fn filter(&self, keys: &[MetricKey]) -> StoreResult<Vec<Metric>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self
            .retry
            .run("filter metrics", StoreError::is_transient, || async move {
                let mut qb: QueryBuilder<Postgres> =
                    QueryBuilder::new("SELECT id, type, delta, value FROM metrics WHERE ");
                let mut clauses = qb.separated(" OR ");
                for key in keys {
                    clauses.push("(id = ");
                    clauses.push_bind_unseparated(key.id.clone());
                    clauses.push_unseparated(" AND type = ");
                    clauses.push_bind_unseparated(key.kind.as_str());
                    clauses.push_unseparated(")");
                }
                let rows = qb
                    .build_query_as::<MetricRow>()
                    .fetch_all(&self.pool)
                    .await?;
                Ok::<_, StoreError>(rows)
            })
            .await?;
        rows.into_iter().map(Metric::try_from).collect()
    }

    pub async fn list(&self) -> StoreResult<Vec<Metric>> {
        let rows: Vec<MetricRow> = self
            .retry
            .run("list metrics", StoreError::is_transient, || async move {
                let rows = sqlx::query_as::<_, MetricRow>(
                    "SELECT id, type, delta, value FROM metrics ORDER BY id, type",
                )
                .fetch_all(&self.pool)
                .await?;
                Ok::<_, StoreError>(rows)
            })
            .await?;
        rows.into_iter().map(Metric::try_from).collect()
    }
}

fn pool_options() -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(ACQUIRE_TIMEOUT)
}

/// Keep the last record per key, ordered by first appearance.
fn dedupe_last(metrics: &[Metric]) -> Vec<Metric> {
    let mut index: HashMap<MetricKey, usize> = HashMap::with_capacity(metrics.len());
    let mut out: Vec<Metric> = Vec::with_capacity(metrics.len());
    for m in metrics {
        match index.get(&m.key()) {
            Some(&i) => out[i] = m.clone(),
            None => {
                index.insert(m.key(), out.len());
                out.push(m.clone());
            }
        }
    }
    out
}
