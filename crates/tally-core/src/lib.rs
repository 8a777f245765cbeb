//! tally-core: shared types for the tally agent and server.
//!
//! A metric is identified by `(id, type)` and carries a tagged value:
//! counters accumulate signed deltas, gauges hold the last sample.
//!
//! # Modules
//!
//! | Module | Contents |
//! |---|---|
//! | [`metric`] | `MetricType`, `MetricValue`, `Metric`, `MetricKey` |
//! | [`envelope`] | Wire envelopes and boundary validation |
//! | [`retry`] | Fixed backoff schedule shared by agent and server |
//! | [`duration`] | `"10s"` / `"500ms"` duration parsing for configuration |
//! | [`logging`] | Text/JSON tracing subscriber setup |

pub mod duration;
pub mod envelope;
pub mod error;
pub mod logging;
pub mod metric;
pub mod retry;

pub use duration::{duration_arg, parse_duration};
pub use envelope::{
    GetRequest, MetricEnvelope, MetricResponse, UpdateRequest, metric_from_path, validate_batch,
};
pub use error::{ModelError, ModelResult};
pub use logging::{LogFormat, init_tracing};
pub use metric::{Metric, MetricKey, MetricType, MetricValue, validate_id};
pub use retry::RetrySchedule;
