//! Metric model.
//!
//! The payload is a tagged [`MetricValue`]; the metric type is implied by the
//! tag, so a counter can never carry a float and a gauge never an integer.
//! On the wire a metric keeps the `{id, type, delta?, value?}` shape (see
//! [`crate::envelope`]).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::envelope::MetricEnvelope;
use crate::error::{ModelError, ModelResult};

/// Separator used by the string form of [`MetricKey`]. Never valid inside an id.
pub const KEY_SEPARATOR: char = ':';

// ── MetricType ────────────────────────────────────────────────────

/// The closed set of metric kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }

    /// Name of the envelope field carrying this type's payload.
    pub fn value_field(&self) -> &'static str {
        match self {
            MetricType::Counter => "delta",
            MetricType::Gauge => "value",
        }
    }

    /// Parse a raw textual value into this type's payload.
    ///
    /// Gauges must be finite; `NaN` and infinities cannot be echoed as JSON.
    pub fn parse_value(&self, raw: &str) -> ModelResult<MetricValue> {
        let invalid = || ModelError::InvalidValue {
            kind: self.as_str(),
            raw: raw.to_string(),
        };
        match self {
            MetricType::Counter => raw
                .trim()
                .parse::<i64>()
                .map(MetricValue::Counter)
                .map_err(|_| invalid()),
            MetricType::Gauge => {
                let v = raw.trim().parse::<f64>().map_err(|_| invalid())?;
                if v.is_finite() {
                    Ok(MetricValue::Gauge(v))
                } else {
                    Err(invalid())
                }
            }
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "counter" => Ok(MetricType::Counter),
            "gauge" => Ok(MetricType::Gauge),
            other => Err(ModelError::UnknownType(other.to_string())),
        }
    }
}

// ── MetricValue ───────────────────────────────────────────────────

/// Payload of a metric. The variant is the metric's type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Counter(i64),
    Gauge(f64),
}

impl MetricValue {
    pub fn kind(&self) -> MetricType {
        match self {
            MetricValue::Counter(_) => MetricType::Counter,
            MetricValue::Gauge(_) => MetricType::Gauge,
        }
    }

    /// Fold an incoming value into this one.
    ///
    /// Counters add (saturating at the i64 bounds), gauges take the incoming
    /// sample. Mismatched kinds replace outright; callers key by type so this
    /// does not happen through the store.
    pub fn apply(self, incoming: MetricValue) -> MetricValue {
        match (self, incoming) {
            (MetricValue::Counter(stored), MetricValue::Counter(delta)) => {
                MetricValue::Counter(stored.saturating_add(delta))
            }
            (_, incoming) => incoming,
        }
    }

    /// Text form used by `GET /value/{type}/{id}`.
    ///
    /// Counters print as integers; gauges print the shortest decimal that
    /// round-trips, never in exponent form (`2.25`, `1`, `0.1`).
    pub fn to_text(&self) -> String {
        match self {
            MetricValue::Counter(delta) => delta.to_string(),
            MetricValue::Gauge(value) => value.to_string(),
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

// ── MetricKey ─────────────────────────────────────────────────────

/// Identity of a metric: `(id, type)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricKey {
    pub id: String,
    pub kind: MetricType,
}

impl MetricKey {
    pub fn new(id: impl Into<String>, kind: MetricType) -> Self {
        Self { id: id.into(), kind }
    }

    /// Build a key from raw wire fields, validating both.
    pub fn parse(id: &str, kind: &str) -> ModelResult<Self> {
        validate_id(id)?;
        let kind = kind.parse::<MetricType>()?;
        Ok(Self::new(id, kind))
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.id, KEY_SEPARATOR, self.kind)
    }
}

/// Decode `"<id>:<type>"`. Exactly one separator is required.
impl FromStr for MetricKey {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(KEY_SEPARATOR);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(id), Some(kind), None) if !id.is_empty() => {
                let kind = kind
                    .parse::<MetricType>()
                    .map_err(|_| ModelError::InvalidKey(s.to_string()))?;
                Ok(Self::new(id, kind))
            }
            _ => Err(ModelError::InvalidKey(s.to_string())),
        }
    }
}

/// Ids must be non-empty and free of the key separator.
pub fn validate_id(id: &str) -> ModelResult<()> {
    if id.is_empty() {
        return Err(ModelError::MissingId);
    }
    if id.contains(KEY_SEPARATOR) {
        return Err(ModelError::InvalidId(id.to_string()));
    }
    Ok(())
}

// ── Metric ────────────────────────────────────────────────────────

/// A single metric record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MetricEnvelope", into = "MetricEnvelope")]
pub struct Metric {
    pub id: String,
    pub value: MetricValue,
}

impl Metric {
    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            id: id.into(),
            value: MetricValue::Counter(delta),
        }
    }

    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            value: MetricValue::Gauge(value),
        }
    }

    pub fn kind(&self) -> MetricType {
        self.value.kind()
    }

    pub fn key(&self) -> MetricKey {
        MetricKey::new(self.id.clone(), self.kind())
    }

    /// Stored delta, if this is a counter.
    pub fn delta(&self) -> Option<i64> {
        match self.value {
            MetricValue::Counter(d) => Some(d),
            MetricValue::Gauge(_) => None,
        }
    }

    /// Stored sample, if this is a gauge.
    pub fn gauge_value(&self) -> Option<f64> {
        match self.value {
            MetricValue::Gauge(v) => Some(v),
            MetricValue::Counter(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_round_trips_through_str() {
        assert_eq!("counter".parse::<MetricType>().unwrap(), MetricType::Counter);
        assert_eq!("gauge".parse::<MetricType>().unwrap(), MetricType::Gauge);
        assert_eq!(MetricType::Gauge.to_string(), "gauge");
    }

    #[test]
    fn unknown_type_rejected() {
        let err = "histogram".parse::<MetricType>().unwrap_err();
        assert_eq!(err, ModelError::UnknownType("histogram".to_string()));
        // Type names are case-sensitive.
        assert!("Counter".parse::<MetricType>().is_err());
    }

    #[test]
    fn counter_apply_accumulates() {
        let v = MetricValue::Counter(3).apply(MetricValue::Counter(4));
        assert_eq!(v, MetricValue::Counter(7));

        let v = v.apply(MetricValue::Counter(-10));
        assert_eq!(v, MetricValue::Counter(-3));
    }

    #[test]
    fn counter_apply_saturates() {
        let v = MetricValue::Counter(i64::MAX).apply(MetricValue::Counter(1));
        assert_eq!(v, MetricValue::Counter(i64::MAX));
    }

    #[test]
    fn gauge_apply_replaces() {
        let v = MetricValue::Gauge(1.5).apply(MetricValue::Gauge(2.25));
        assert_eq!(v, MetricValue::Gauge(2.25));
    }

    #[test]
    fn text_form() {
        assert_eq!(MetricValue::Counter(7).to_text(), "7");
        assert_eq!(MetricValue::Counter(-42).to_text(), "-42");
        assert_eq!(MetricValue::Gauge(2.25).to_text(), "2.25");
        assert_eq!(MetricValue::Gauge(1.0).to_text(), "1");
        assert_eq!(MetricValue::Gauge(0.1).to_text(), "0.1");
        assert_eq!(MetricValue::Gauge(1e21).to_text(), "1000000000000000000000");
    }

    #[test]
    fn parse_counter_value() {
        assert_eq!(
            MetricType::Counter.parse_value("12").unwrap(),
            MetricValue::Counter(12)
        );
        assert!(MetricType::Counter.parse_value("1.5").is_err());
        assert!(MetricType::Counter.parse_value("").is_err());
    }

    #[test]
    fn parse_gauge_value() {
        assert_eq!(
            MetricType::Gauge.parse_value("-0.5").unwrap(),
            MetricValue::Gauge(-0.5)
        );
        assert_eq!(
            MetricType::Gauge.parse_value("3").unwrap(),
            MetricValue::Gauge(3.0)
        );
        assert!(MetricType::Gauge.parse_value("not_a_number").is_err());
        assert!(MetricType::Gauge.parse_value("NaN").is_err());
        assert!(MetricType::Gauge.parse_value("inf").is_err());
    }

    #[test]
    fn key_display_and_parse() {
        let key = MetricKey::new("PollCount", MetricType::Counter);
        assert_eq!(key.to_string(), "PollCount:counter");
        assert_eq!("PollCount:counter".parse::<MetricKey>().unwrap(), key);
    }

    #[test]
    fn key_parse_requires_exactly_one_separator() {
        assert!("PollCount".parse::<MetricKey>().is_err());
        assert!("a:b:counter".parse::<MetricKey>().is_err());
        assert!(":counter".parse::<MetricKey>().is_err());
        assert!("x:histogram".parse::<MetricKey>().is_err());
    }

    #[test]
    fn validate_id_rules() {
        assert!(validate_id("Alloc").is_ok());
        assert!(validate_id("heap_alloc").is_ok());
        assert_eq!(validate_id(""), Err(ModelError::MissingId));
        assert!(matches!(validate_id("a:b"), Err(ModelError::InvalidId(_))));
    }

    #[test]
    fn same_id_different_type_are_distinct_keys() {
        let c = Metric::counter("x", 1).key();
        let g = Metric::gauge("x", 1.0).key();
        assert_ne!(c, g);
    }

    #[test]
    fn accessors_match_variant() {
        let c = Metric::counter("c", 5);
        assert_eq!(c.delta(), Some(5));
        assert_eq!(c.gauge_value(), None);

        let g = Metric::gauge("g", 0.5);
        assert_eq!(g.delta(), None);
        assert_eq!(g.gauge_value(), Some(0.5));
    }
}
