//! Wire envelopes and boundary validation.
//!
//! The envelope keeps the historical JSON shape where the payload lives in
//! one of two optional fields:
//!
//! ```json
//! {"id": "PollCount", "type": "counter", "delta": 3}
//! {"id": "Alloc", "type": "gauge", "value": 1024.5}
//! ```
//!
//! Validation order matters for status mapping: an empty id is reported
//! before an unknown type, which is reported before a missing payload.

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};
use crate::metric::{Metric, MetricKey, MetricType, MetricValue, validate_id};

/// `{id, type, delta?, value?}` as sent and received over HTTP and stored in
/// snapshot files.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricEnvelope {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

/// Inbound update.
pub type UpdateRequest = MetricEnvelope;

/// Post-update echo; same shape as [`UpdateRequest`].
pub type MetricResponse = MetricEnvelope;

impl MetricEnvelope {
    /// Validate and convert into a [`Metric`].
    pub fn into_metric(self) -> ModelResult<Metric> {
        validate_id(&self.id)?;
        let kind = self.kind.parse::<MetricType>()?;
        let value = match kind {
            MetricType::Counter => self.delta.map(MetricValue::Counter),
            MetricType::Gauge => self
                .value
                .filter(|v| v.is_finite())
                .map(MetricValue::Gauge),
        };
        match value {
            Some(value) => Ok(Metric { id: self.id, value }),
            None => Err(ModelError::MissingValue {
                id: self.id,
                kind: kind.as_str(),
                field: kind.value_field(),
            }),
        }
    }
}

impl TryFrom<MetricEnvelope> for Metric {
    type Error = ModelError;

    fn try_from(envelope: MetricEnvelope) -> Result<Self, Self::Error> {
        envelope.into_metric()
    }
}

impl From<Metric> for MetricEnvelope {
    fn from(metric: Metric) -> Self {
        let (delta, value) = match metric.value {
            MetricValue::Counter(d) => (Some(d), None),
            MetricValue::Gauge(v) => (None, Some(v)),
        };
        Self {
            id: metric.id,
            kind: metric.value.kind().as_str().to_string(),
            delta,
            value,
        }
    }
}

/// Validate a whole batch before anything is applied.
///
/// Returns the first error encountered; on success the metrics keep the
/// batch order.
pub fn validate_batch(batch: Vec<UpdateRequest>) -> ModelResult<Vec<Metric>> {
    batch.into_iter().map(MetricEnvelope::into_metric).collect()
}

/// Build a metric from path segments (`/update/{type}/{id}/{value}`).
pub fn metric_from_path(kind: &str, id: &str, raw: &str) -> ModelResult<Metric> {
    validate_id(id)?;
    let kind = kind.parse::<MetricType>()?;
    let value = kind.parse_value(raw)?;
    Ok(Metric {
        id: id.to_string(),
        value,
    })
}

/// Inbound lookup.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GetRequest {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

impl GetRequest {
    pub fn key(&self) -> ModelResult<MetricKey> {
        MetricKey::parse(&self.id, &self.kind)
    }
}
