//! Request pipeline layers: access log, deadline, gzip.

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use axum::body::{Body, HttpBody, to_bytes};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tracing::{info, warn};

use crate::error::ApiError;

/// Upper bound on a request body, compressed or inflated.
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

// ── Logging ─────────────────────────────────────────────────────

/// One line per request: method, uri, status, latency, response size.
pub async fn log_requests(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let started = Instant::now();

    let resp = next.run(req).await;

    let size = resp.body().size_hint().exact();
    info!(
        %method,
        %uri,
        status = resp.status().as_u16(),
        latency_ms = started.elapsed().as_millis() as u64,
        size,
        "request served"
    );
    resp
}

// ── Deadline ────────────────────────────────────────────────────

/// Abort the handler once `limit` has passed and answer 408.
pub async fn deadline(State(limit): State<Duration>, req: Request, next: Next) -> Response {
    let uri = req.uri().clone();
    match tokio::time::timeout(limit, next.run(req)).await {
        Ok(resp) => resp,
        Err(_) => {
            warn!(%uri, ?limit, "request deadline exceeded");
            ApiError::DeadlineExceeded(limit).into_response()
        }
    }
}

// ── Compression ─────────────────────────────────────────────────

/// Inflate `Content-Encoding: gzip` request bodies and compress responses
/// for clients that send `Accept-Encoding: gzip`.
pub async fn gzip(req: Request, next: Next) -> Result<Response, ApiError> {
    let wants_gzip = accepts_gzip(req.headers());
    let req = if is_gzip(req.headers()) {
        inflate_request(req).await?
    } else {
        req
    };

    let resp = next.run(req).await;
    if !wants_gzip || resp.headers().contains_key(header::CONTENT_ENCODING) {
        return Ok(resp);
    }
    compress_response(resp).await
}

fn is_gzip(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("gzip"))
}

fn accepts_gzip(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::ACCEPT_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|coding| coding.split(';').next())
        .any(|coding| coding.trim().eq_ignore_ascii_case("gzip"))
}

async fn inflate_request(req: Request) -> Result<Request, ApiError> {
    let (mut parts, body) = req.into_parts();
    let compressed = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| ApiError::InvalidInput(format!("reading request body: {e}")))?;

    let mut inflated = Vec::with_capacity(compressed.len() * 4);
    GzDecoder::new(&compressed[..])
        .take(MAX_BODY_BYTES as u64 + 1)
        .read_to_end(&mut inflated)
        .map_err(|e| ApiError::InvalidInput(format!("invalid gzip body: {e}")))?;
    if inflated.len() > MAX_BODY_BYTES {
        return Err(ApiError::InvalidInput("inflated body too large".into()));
    }

    parts.headers.remove(header::CONTENT_ENCODING);
    parts.headers.insert(header::CONTENT_LENGTH, HeaderValue::from(inflated.len()));
    Ok(Request::from_parts(parts, Body::from(inflated)))
}

async fn compress_response(resp: Response) -> Result<Response, ApiError> {
    let (mut parts, body) = resp.into_parts();
    let plain = to_bytes(body, usize::MAX)
        .await
        .map_err(|e| ApiError::Internal(format!("reading response body: {e}")))?;
    if plain.is_empty() {
        return Ok(Response::from_parts(parts, Body::empty()));
    }

    let mut encoder = GzEncoder::new(Vec::with_capacity(plain.len() / 2), Compression::default());
    encoder
        .write_all(&plain)
        .map_err(|e| ApiError::Internal(format!("gzip: {e}")))?;
    let compressed = encoder
        .finish()
        .map_err(|e| ApiError::Internal(format!("gzip: {e}")))?;

    parts
        .headers
        .insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
    parts
        .headers
        .insert(header::CONTENT_LENGTH, HeaderValue::from(compressed.len()));
    parts
        .headers
        .append(header::VARY, HeaderValue::from_static("accept-encoding"));
    Ok(Response::from_parts(parts, Body::from(compressed)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::{self, StatusCode};
    use axum::routing::{get, post};
    use tower::ServiceExt;

    fn gzipped(data: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn echo_router() -> Router {
        Router::new()
            .route("/echo", post(|body: String| async move { body }))
            .layer(axum::middleware::from_fn(gzip))
    }

    #[test]
    fn accept_encoding_parsing() {
        let mut headers = HeaderMap::new();
        assert!(!accepts_gzip(&headers));
        headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("br, gzip;q=0.8"));
        assert!(accepts_gzip(&headers));
        headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("deflate"));
        assert!(!accepts_gzip(&headers));
    }

    #[tokio::test]
    async fn gzip_request_is_inflated() {
        let req = http::Request::post("/echo")
            .header(header::CONTENT_ENCODING, "gzip")
            .body(Body::from(gzipped(b"hello tally")))
            .unwrap();
        let resp = echo_router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"hello tally");
    }

    #[tokio::test]
    async fn response_is_compressed_when_accepted() {
        let req = http::Request::post("/echo")
            .header(header::ACCEPT_ENCODING, "gzip")
            .body(Body::from("compress me"))
            .unwrap();
        let resp = echo_router().oneshot(req).await.unwrap();
        assert_eq!(resp.headers().get(header::CONTENT_ENCODING).unwrap(), "gzip");

        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let mut plain = String::new();
        GzDecoder::new(&body[..]).read_to_string(&mut plain).unwrap();
        assert_eq!(plain, "compress me");
    }

    #[tokio::test]
    async fn corrupt_gzip_is_400() {
        let req = http::Request::post("/echo")
            .header(header::CONTENT_ENCODING, "gzip")
            .body(Body::from("definitely not gzip"))
            .unwrap();
        let resp = echo_router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn slow_handler_gets_408() {
        let app = Router::new()
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    "late"
                }),
            )
            .layer(axum::middleware::from_fn_with_state(
                Duration::from_millis(20),
                deadline,
            ));
        let resp = app
            .oneshot(http::Request::get("/slow").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::REQUEST_TIMEOUT);
    }

    #[tokio::test]
    async fn fast_handler_passes_deadline() {
        let app = Router::new()
            .route("/fast", get(|| async { "ok" }))
            .layer(axum::middleware::from_fn_with_state(
                Duration::from_secs(1),
                deadline,
            ))
            .layer(axum::middleware::from_fn(log_requests));
        let resp = app
            .oneshot(http::Request::get("/fast").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
