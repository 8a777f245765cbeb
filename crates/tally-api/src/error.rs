//! Error-to-status mapping.
//!
//! JSON routes answer with `{"error": "..."}`; the path-segment routes answer
//! with the bare message as `text/plain`. Both share [`ApiError`] for the
//! status decision.

use std::time::Duration;

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::{error, warn};

use tally_core::ModelError;
use tally_store::StoreError;

pub type ApiResult<T> = Result<T, ApiError>;

/// Seconds a client should wait after a transient dependency failure.
const RETRY_AFTER_SECS: &str = "1";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    MissingIdentity(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    UnsupportedMedia(String),

    #[error("request exceeded {0:?} deadline")]
    DeadlineExceeded(Duration),

    #[error("{0}")]
    TransientDependency(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::MissingIdentity(_) | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::UnsupportedMedia(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::DeadlineExceeded(_) => StatusCode::REQUEST_TIMEOUT,
            Self::TransientDependency(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Log server-side failures once, at the point they become responses.
    fn log(&self) {
        match self {
            Self::TransientDependency(msg) => warn!(error = %msg, "transient dependency failure"),
            Self::Internal(msg) => error!(error = %msg, "request failed"),
            _ => {}
        }
    }

    fn finish(&self, mut resp: Response) -> Response {
        self.log();
        *resp.status_mut() = self.status();
        if matches!(self, Self::TransientDependency(_)) {
            resp.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from_static(RETRY_AFTER_SECS),
            );
        }
        resp
    }
}

impl From<ModelError> for ApiError {
    fn from(e: ModelError) -> Self {
        if e.is_missing_identity() {
            Self::MissingIdentity(e.to_string())
        } else {
            Self::InvalidInput(e.to_string())
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        if e.is_transient() {
            Self::TransientDependency(e.to_string())
        } else {
            Self::Internal(e.to_string())
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.to_string(),
        });
        self.finish(body.into_response())
    }
}

/// [`ApiError`] rendered as plain text.
#[derive(Debug)]
pub struct TextError(pub ApiError);

impl IntoResponse for TextError {
    fn into_response(self) -> Response {
        let body = self.0.to_string();
        self.0.finish(body.into_response())
    }
}

impl From<ApiError> for TextError {
    fn from(e: ApiError) -> Self {
        Self(e)
    }
}

impl From<ModelError> for TextError {
    fn from(e: ModelError) -> Self {
        Self(e.into())
    }
}

impl From<StoreError> for TextError {
    fn from(e: StoreError) -> Self {
        Self(e.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_errors_map_to_status() {
        assert_eq!(ApiError::from(ModelError::MissingId).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::from(ModelError::UnknownType("histogram".into())).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn store_errors_map_to_500() {
        let err = ApiError::from(StoreError::NotConfigured);
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(matches!(err, ApiError::Internal(_)));

        let err = ApiError::from(StoreError::from(sqlx::Error::PoolTimedOut));
        assert!(matches!(err, ApiError::TransientDependency(_)));
    }

    #[test]
    fn transient_response_carries_retry_after() {
        let resp = ApiError::TransientDependency("db down".into()).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(resp.headers().get(header::RETRY_AFTER).unwrap(), "1");

        let resp = ApiError::Internal("boom".into()).into_response();
        assert!(resp.headers().get(header::RETRY_AFTER).is_none());
    }

    #[test]
    fn text_error_is_plain_text() {
        let resp = TextError(ApiError::NotFound("metric not found".into())).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let ct = resp.headers().get(header::CONTENT_TYPE).unwrap();
        assert!(ct.to_str().unwrap().starts_with("text/plain"));
    }
}
