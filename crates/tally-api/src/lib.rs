//! HTTP surface of the tally server.
//!
//! Thin axum handlers over [`tally_store::Storage`]: envelopes are validated
//! here, then handed to the store.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/update/` | Apply one JSON update, echo post-update state |
//! | POST | `/update/{type}/{id}/{value}` | Apply one update from path segments |
//! | POST | `/updates/` | Apply a JSON batch in order |
//! | POST | `/value/` | Look up one metric (JSON) |
//! | GET | `/value/{type}/{id}` | Look up one metric (plain text) |
//! | GET | `/` | HTML index of every metric |
//! | GET | `/ping` | Database liveness |
//!
//! Every route runs behind request logging, a per-request deadline (408 when
//! exceeded), and gzip request/response handling.

pub mod error;
pub mod extract;
pub mod handlers;
pub mod index;
pub mod middleware;

use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use tally_store::Storage;

pub use error::{ApiError, ApiResult, TextError};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub storage: Storage,
}

/// Router-level settings.
#[derive(Debug, Clone, Copy)]
pub struct ApiConfig {
    /// Deadline for each request, after which the client gets 408.
    pub request_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Build the complete router.
pub fn build_router(storage: Storage, config: ApiConfig) -> Router {
    let state = ApiState { storage };

    Router::new()
        .route("/", get(index::index))
        .route("/ping", get(handlers::ping))
        .route("/update/", post(handlers::update))
        .route("/update/{kind}/{id}/{value}", post(handlers::update_from_path))
        .route("/updates/", post(handlers::update_batch))
        .route("/value/", post(handlers::value))
        .route("/value/{kind}/{id}", get(handlers::value_from_path))
        .with_state(state)
        .layer(axum::middleware::from_fn(middleware::gzip))
        .layer(axum::middleware::from_fn_with_state(
            config.request_timeout,
            middleware::deadline,
        ))
        .layer(axum::middleware::from_fn(middleware::log_requests))
}
