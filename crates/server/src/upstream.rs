//! Origin fetcher for the upstream npm registry.
//!
//! Single attempt, no retries. Only allowlisted request headers are
//! forwarded and only allowlisted response headers are kept. Bodies are
//! decompressed before they are returned so callers cache and serve the
//! plain bytes.

use crate::compression::{ContentEncoding, decode_body};
use crate::metrics;
use axum::http::{HeaderMap as HttpHeaderMap, Method, StatusCode};
use bytes::Bytes;
use reqwest::header::{ACCEPT, ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE, USER_AGENT};
use std::time::{Duration, Instant};
use tarn_core::config::UpstreamConfig;
use tarn_storage::HeaderMap;

/// Request headers copied from the client to the origin.
///
/// `authorization` is forwarded as-is, including tokens issued by this proxy.
pub const FORWARDED_REQUEST_HEADERS: [&str; 7] = [
    "authorization",
    "x-npm-auth-token",
    "x-npm-session",
    "x-npm-auth-type",
    "if-none-match",
    "if-modified-since",
    "range",
];

/// Response headers kept from the origin.
pub const RETAINED_RESPONSE_HEADERS: [&str; 6] = [
    "content-type",
    "etag",
    "last-modified",
    "cache-control",
    "expires",
    "age",
];

/// Origin fetch failures.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream request timed out: {0}")]
    Timeout(String),

    #[error("upstream request failed: {0}")]
    Request(String),

    #[error("failed to decompress upstream body: {0}")]
    DecompressionFailed(String),
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else {
            Self::Request(e.to_string())
        }
    }
}

/// A fully read, decompressed origin response.
#[derive(Clone, Debug)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub bytes: Bytes,
    /// Retained headers, lowercase names, `content-length` recomputed.
    pub headers: HeaderMap,
}

/// HTTP client bound to one upstream registry.
pub struct UpstreamClient {
    client: reqwest::Client,
    base_url: String,
    user_agent: String,
}

impl UpstreamClient {
    /// Build a client from configuration.
    pub fn new(config: &UpstreamConfig) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.timeout().min(Duration::from_secs(10)))
            .build()
            .map_err(|e| UpstreamError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url().to_string(),
            user_agent: config.user_agent.clone(),
        })
    }

    /// Registry base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Upstream URL for a registry-relative path (may include a query).
    pub fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// GET a registry path for the read flow.
    pub async fn fetch(
        &self,
        path: &str,
        incoming: &HttpHeaderMap,
    ) -> Result<UpstreamResponse, UpstreamError> {
        self.send(Method::GET, path, incoming, None, false).await
    }

    /// Relay an arbitrary request to the origin. `location` is retained
    /// so redirects and created-resource responses reach the client.
    pub async fn relay(
        &self,
        method: Method,
        path_and_query: &str,
        incoming: &HttpHeaderMap,
        body: Bytes,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let body = (method != Method::GET && method != Method::HEAD).then_some(body);
        self.send(method, path_and_query, incoming, body, true).await
    }

    #[tracing::instrument(skip(self, incoming, body), fields(upstream = %self.base_url))]
    async fn send(
        &self,
        method: Method,
        path: &str,
        incoming: &HttpHeaderMap,
        body: Option<Bytes>,
        keep_location: bool,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let url = self.url_for(path);
        let mut request = self
            .client
            .request(method.clone(), &url)
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, "*/*")
            .header(ACCEPT_ENCODING, "gzip, deflate");

        for name in FORWARDED_REQUEST_HEADERS {
            if let Some(value) = incoming.get(name) {
                request = request.header(name, value.clone());
            }
        }
        if let Some(body) = body {
            let content_type = incoming
                .get(CONTENT_TYPE)
                .cloned()
                .unwrap_or_else(|| reqwest::header::HeaderValue::from_static("application/json"));
            request = request.header(CONTENT_TYPE, content_type).body(body);
        }

        let started = Instant::now();
        let result = self.execute(request).await;
        metrics::ORIGIN_FETCH_DURATION.observe(started.elapsed().as_secs_f64());

        let (status, raw_headers, raw_body) = match result {
            Ok(parts) => parts,
            Err(e) => {
                let outcome = match e {
                    UpstreamError::Timeout(_) => "timeout",
                    _ => "error",
                };
                metrics::ORIGIN_FETCHES.with_label_values(&[outcome]).inc();
                tracing::warn!(%url, %method, error = %e, "origin request failed");
                return Err(e);
            }
        };

        let encoding_header = raw_headers
            .get(CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok());
        let encoding = ContentEncoding::parse(encoding_header).ok_or_else(|| {
            UpstreamError::DecompressionFailed(format!(
                "unsupported content-encoding: {}",
                encoding_header.unwrap_or_default()
            ))
        })?;
        let bytes = decode_body(encoding, raw_body).await.map_err(|e| {
            metrics::ORIGIN_FETCHES.with_label_values(&["decompression_failed"]).inc();
            UpstreamError::DecompressionFailed(e.to_string())
        })?;

        let mut headers = HeaderMap::new();
        let retained = RETAINED_RESPONSE_HEADERS
            .iter()
            .copied()
            .chain(keep_location.then_some("location"));
        for name in retained {
            if let Some(value) = raw_headers.get(name).and_then(|v| v.to_str().ok()) {
                headers.insert(name.to_string(), value.to_string());
            }
        }
        headers.insert("content-length".to_string(), bytes.len().to_string());

        metrics::ORIGIN_FETCHES.with_label_values(&["ok"]).inc();
        tracing::debug!(%url, status = status.as_u16(), size = bytes.len(), "origin responded");

        Ok(UpstreamResponse {
            status,
            bytes,
            headers,
        })
    }

    async fn execute(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<(StatusCode, reqwest::header::HeaderMap, Bytes), UpstreamError> {
        let response = request.send().await?;
        let status = StatusCode::from_u16(response.status().as_u16())
            .map_err(|e| UpstreamError::Request(e.to_string()))?;
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        Ok((status, headers, body))
    }
}
