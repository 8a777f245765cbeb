//! Error types for metric parsing and validation.

use thiserror::Error;

/// Result type alias for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised while turning wire input into a [`crate::Metric`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    /// The metric id was empty.
    #[error("metric id is empty")]
    MissingId,

    /// The metric id contains a reserved character.
    #[error("metric id {0:?} contains reserved character ':'")]
    InvalidId(String),

    #[error("unknown metric type {0:?}")]
    UnknownType(String),

    /// A counter arrived without `delta` or a gauge without `value`.
    #[error("{kind} {id:?} is missing its {field} field")]
    MissingValue {
        id: String,
        kind: &'static str,
        field: &'static str,
    },

    #[error("invalid {kind} value {raw:?}")]
    InvalidValue { kind: &'static str, raw: String },

    #[error("invalid metric key {0:?}: expected <id>:<type>")]
    InvalidKey(String),
}

impl ModelError {
    /// Whether the error stems from a missing identity rather than bad input.
    ///
    /// The HTTP layer maps this to 404 instead of 400.
    pub fn is_missing_identity(&self) -> bool {
        matches!(self, ModelError::MissingId)
    }
}
