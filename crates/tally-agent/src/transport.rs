//! Batch delivery over HTTP.
//!
//! A batch is one `POST {address}/updates/` carrying a gzip-compressed JSON
//! array. The server flags transient storage failures with a 5xx plus
//! `Retry-After`; those, 503 and 504 are the only retriable outcomes.

use std::future::Future;
use std::io::Write;
use std::time::Duration;

use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;
use http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE, RETRY_AFTER};
use http::{Method, Request, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tracing::debug;

use tally_core::Metric;

pub type DeliveryResult<T> = Result<T, DeliveryError>;

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("invalid server address {address:?}: {source}")]
    InvalidAddress {
        address: String,
        source: http::uri::InvalidUri,
    },

    #[error("encoding batch: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("compressing batch: {0}")]
    Compress(#[from] std::io::Error),

    #[error("building request: {0}")]
    Request(#[from] http::Error),

    #[error("sending batch: {0}")]
    Transport(#[from] hyper_util::client::legacy::Error),

    #[error("reading response: {0}")]
    Body(#[from] hyper::Error),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("server answered {status}")]
    Status { status: StatusCode, retry_after: bool },
}

impl DeliveryError {
    /// Whether another attempt may succeed.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Status {
                status,
                retry_after,
            } => {
                *status == StatusCode::SERVICE_UNAVAILABLE
                    || *status == StatusCode::GATEWAY_TIMEOUT
                    || (status.is_server_error() && *retry_after)
            }
            _ => false,
        }
    }
}

/// Something that can ship a batch to the server.
pub trait Transport {
    fn deliver(&self, batch: &[Metric]) -> impl Future<Output = DeliveryResult<()>> + Send;
}

/// hyper-based [`Transport`] posting to `/updates/`.
pub struct HttpTransport {
    client: Client<HttpConnector, Full<Bytes>>,
    endpoint: Uri,
    timeout: Duration,
}

impl HttpTransport {
    /// `address` must carry a scheme (`http://host:port`).
    pub fn new(address: &str, timeout: Duration) -> DeliveryResult<Self> {
        let raw = format!("{}/updates/", address.trim_end_matches('/'));
        let endpoint = raw
            .parse::<Uri>()
            .map_err(|source| DeliveryError::InvalidAddress {
                address: address.to_string(),
                source,
            })?;
        let client = Client::builder(TokioExecutor::new()).build_http();
        Ok(Self {
            client,
            endpoint,
            timeout,
        })
    }

    pub fn endpoint(&self) -> &Uri {
        &self.endpoint
    }

    async fn post(&self, body: Bytes) -> DeliveryResult<()> {
        let req = Request::builder()
            .method(Method::POST)
            .uri(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_ENCODING, "gzip")
            .header(ACCEPT_ENCODING, "gzip")
            .body(Full::new(body))?;

        let resp = self.client.request(req).await?;
        let status = resp.status();
        let retry_after = resp.headers().contains_key(RETRY_AFTER);
        // Drain so the connection can go back to the pool.
        resp.into_body().collect().await?;

        if status.is_success() {
            Ok(())
        } else {
            Err(DeliveryError::Status {
                status,
                retry_after,
            })
        }
    }
}

impl Transport for HttpTransport {
    async fn deliver(&self, batch: &[Metric]) -> DeliveryResult<()> {
        let body = encode_batch(batch)?;
        let compressed = body.len();
        tokio::time::timeout(self.timeout, self.post(body))
            .await
            .map_err(|_| DeliveryError::Timeout(self.timeout))??;
        debug!(records = batch.len(), bytes = compressed, "batch delivered");
        Ok(())
    }
}

/// JSON-encode and gzip a batch.
pub fn encode_batch(batch: &[Metric]) -> DeliveryResult<Bytes> {
    let json = serde_json::to_vec(batch)?;
    let mut encoder = GzEncoder::new(Vec::with_capacity(json.len() / 2), Compression::default());
    encoder.write_all(&json)?;
    Ok(Bytes::from(encoder.finish()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn status(code: u16, retry_after: bool) -> DeliveryError {
        DeliveryError::Status {
            status: StatusCode::from_u16(code).unwrap(),
            retry_after,
        }
    }

    #[test]
    fn retriable_classification() {
        assert!(status(503, false).is_retriable());
        assert!(status(504, false).is_retriable());
        assert!(status(500, true).is_retriable());
        assert!(!status(500, false).is_retriable());
        assert!(!status(400, false).is_retriable());
        assert!(!status(404, true).is_retriable());
        assert!(!DeliveryError::Timeout(Duration::from_secs(5)).is_retriable());
    }

    #[test]
    fn batch_is_gzipped_json_array() {
        let body = encode_batch(&[Metric::counter("PollCount", 1), Metric::gauge("Alloc", 2.5)])
            .unwrap();
        let mut json = String::new();
        GzDecoder::new(&body[..]).read_to_string(&mut json).unwrap();
        assert_eq!(
            json,
            r#"[{"id":"PollCount","type":"counter","delta":1},{"id":"Alloc","type":"gauge","value":2.5}]"#
        );
    }

    #[test]
    fn endpoint_appends_updates_path() {
        let t = HttpTransport::new("http://localhost:8080/", Duration::from_secs(1)).unwrap();
        assert_eq!(t.endpoint().to_string(), "http://localhost:8080/updates/");
    }

    #[test]
    fn invalid_address_rejected() {
        assert!(matches!(
            HttpTransport::new("http://bad host", Duration::from_secs(1)),
            Err(DeliveryError::InvalidAddress { .. })
        ));
    }
}
