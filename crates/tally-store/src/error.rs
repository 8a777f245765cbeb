//! Error types for the metric store and its durable backends.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("snapshot i/o on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// A snapshot line could not be decoded. Fatal at startup.
    #[error("malformed snapshot record in {} at line {line}: {reason}", .path.display())]
    Corrupt {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid database row: {0}")]
    InvalidRow(String),

    #[error("database is not configured")]
    NotConfigured,
}

impl StoreError {
    /// Connection-class failures worth retrying: the request may succeed
    /// once the database is reachable again.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Database(e) => is_transient_db(e),
            _ => false,
        }
    }
}

/// SQLSTATE class 08 covers connection exceptions, including `08003`
/// (connection does not exist) and `08007` (transaction resolution unknown).
fn is_transient_db(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => db.code().is_some_and(|code| code.starts_with("08")),
        _ => false,
    }
}
