//! Metric API handlers.
//!
//! Validation happens before the store is touched, so a rejected request
//! (including any invalid element of a batch) leaves state unchanged.

use axum::Json;
use axum::extract::{Path, State};
use tracing::debug;

use tally_core::{
    GetRequest, MetricKey, MetricResponse, UpdateRequest, metric_from_path, validate_batch,
};

use crate::ApiState;
use crate::error::{ApiError, ApiResult, TextError};
use crate::extract::JsonBody;

// ── Updates ─────────────────────────────────────────────────────

/// POST /update/
pub async fn update(
    State(state): State<ApiState>,
    JsonBody(req): JsonBody<UpdateRequest>,
) -> ApiResult<Json<MetricResponse>> {
    let metric = req.into_metric()?;
    let post = state.storage.update(metric).await?;
    debug!(key = %post.key(), value = %post.value, "metric updated");
    Ok(Json(post.into()))
}

/// POST /update/{type}/{id}/{value}
///
/// Answers with the post-update value as text.
pub async fn update_from_path(
    State(state): State<ApiState>,
    Path((kind, id, raw)): Path<(String, String, String)>,
) -> Result<String, TextError> {
    let metric = metric_from_path(&kind, &id, &raw)?;
    let post = state.storage.update(metric).await?;
    Ok(post.value.to_text())
}

/// POST /updates/
pub async fn update_batch(
    State(state): State<ApiState>,
    JsonBody(batch): JsonBody<Vec<UpdateRequest>>,
) -> ApiResult<Json<Vec<MetricResponse>>> {
    let metrics = validate_batch(batch)?;
    let applied = state.storage.update_batch(metrics).await?;
    debug!(count = applied.len(), "batch updated");
    Ok(Json(applied.into_iter().map(MetricResponse::from).collect()))
}

// ── Lookups ─────────────────────────────────────────────────────

/// POST /value/
pub async fn value(
    State(state): State<ApiState>,
    JsonBody(req): JsonBody<GetRequest>,
) -> ApiResult<Json<MetricResponse>> {
    let key = req.key()?;
    match state.storage.get(&key).await {
        Some(metric) => Ok(Json(metric.into())),
        None => Err(not_found(&key)),
    }
}

/// GET /value/{type}/{id}
pub async fn value_from_path(
    State(state): State<ApiState>,
    Path((kind, id)): Path<(String, String)>,
) -> Result<String, TextError> {
    let key = MetricKey::parse(&id, &kind)?;
    match state.storage.get(&key).await {
        Some(metric) => Ok(metric.value.to_text()),
        None => Err(not_found(&key).into()),
    }
}

fn not_found(key: &MetricKey) -> ApiError {
    ApiError::NotFound(format!("metric {key} not found"))
}

// ── Health ──────────────────────────────────────────────────────

/// GET /ping
pub async fn ping(State(state): State<ApiState>) -> Result<&'static str, TextError> {
    state.storage.ping().await?;
    Ok("OK")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use tally_core::Metric;
    use tally_store::Storage;

    fn test_state() -> ApiState {
        ApiState {
            storage: Storage::in_memory(),
        }
    }

    fn counter(id: &str, delta: i64) -> UpdateRequest {
        Metric::counter(id, delta).into()
    }

    fn gauge(id: &str, value: f64) -> UpdateRequest {
        Metric::gauge(id, value).into()
    }

    fn lookup(id: &str, kind: &str) -> GetRequest {
        GetRequest {
            id: id.to_string(),
            kind: kind.to_string(),
        }
    }

    #[tokio::test]
    async fn update_counter_echoes_running_total() {
        let state = test_state();
        update(State(state.clone()), JsonBody(counter("req", 3)))
            .await
            .unwrap();
        let Json(resp) = update(State(state), JsonBody(counter("req", 4)))
            .await
            .unwrap();
        assert_eq!(resp.delta, Some(7));
        assert_eq!(resp.value, None);
    }

    #[tokio::test]
    async fn update_gauge_replaces() {
        let state = test_state();
        update(State(state.clone()), JsonBody(gauge("t", 1.5)))
            .await
            .unwrap();
        update(State(state.clone()), JsonBody(gauge("t", 2.25)))
            .await
            .unwrap();
        let Json(resp) = value(State(state), JsonBody(lookup("t", "gauge")))
            .await
            .unwrap();
        assert_eq!(resp.value, Some(2.25));
    }

    #[tokio::test]
    async fn update_without_id_is_404() {
        let state = test_state();
        let err = update(State(state), JsonBody(counter("", 1)))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn update_with_unknown_type_is_400() {
        let state = test_state();
        let req = UpdateRequest {
            id: "x".into(),
            kind: "histogram".into(),
            delta: Some(1),
            value: None,
        };
        let err = update(State(state), JsonBody(req)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn update_from_path_returns_text_value() {
        let state = test_state();
        let body = update_from_path(
            State(state.clone()),
            Path(("counter".into(), "hits".into(), "5".into())),
        )
        .await
        .unwrap();
        assert_eq!(body, "5");

        let body = value_from_path(State(state), Path(("counter".into(), "hits".into())))
            .await
            .unwrap();
        assert_eq!(body, "5");
    }

    #[tokio::test]
    async fn update_from_path_rejects_bad_value() {
        let state = test_state();
        let err = update_from_path(
            State(state.clone()),
            Path(("gauge".into(), "temp".into(), "not_a_number".into())),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0.status(), StatusCode::BAD_REQUEST);
        assert!(state.storage.list().await.is_empty());
    }

    #[tokio::test]
    async fn batch_with_invalid_element_applies_nothing() {
        let state = test_state();
        let bad = UpdateRequest {
            id: "b".into(),
            kind: "gauge".into(),
            delta: None,
            value: None,
        };
        let err = update_batch(State(state.clone()), JsonBody(vec![counter("a", 1), bad]))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(state.storage.list().await.is_empty());
    }

    #[tokio::test]
    async fn batch_reports_running_state_per_element() {
        let state = test_state();
        let Json(resp) = update_batch(
            State(state),
            JsonBody(vec![counter("req", 2), gauge("t", 0.5), counter("req", 5)]),
        )
        .await
        .unwrap();
        let deltas: Vec<Option<i64>> = resp.iter().map(|r| r.delta).collect();
        assert_eq!(deltas, vec![Some(2), None, Some(7)]);
    }

    #[tokio::test]
    async fn empty_batch_is_ok() {
        let state = test_state();
        let Json(resp) = update_batch(State(state), JsonBody(Vec::new()))
            .await
            .unwrap();
        assert!(resp.is_empty());
    }

    #[tokio::test]
    async fn value_of_absent_metric_is_404() {
        let state = test_state();
        let err = value(State(state.clone()), JsonBody(lookup("nope", "counter")))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let err = value_from_path(State(state), Path(("gauge".into(), "nope".into())))
            .await
            .unwrap_err();
        assert_eq!(err.0.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn value_with_unknown_type_is_400() {
        let state = test_state();
        let err = value_from_path(State(state), Path(("histogram".into(), "x".into())))
            .await
            .unwrap_err();
        assert_eq!(err.0.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn ping_without_database_is_500() {
        let state = test_state();
        let resp = ping(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
