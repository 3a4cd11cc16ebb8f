//! Terminal forward: hands the enriched request to the downstream services.

use std::time::Duration;

use async_trait::async_trait;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::StatusCode;
use learnms_core::RequestDescriptor;
use serde_json::json;
use tracing::{debug, info_span, Instrument};
use url::Url;

use crate::config::ForwardConfig;
use crate::pipeline::ResponseStatus;

/// Connection-scoped headers that must not be relayed by a proxy (RFC 9110 §7.6.1).
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Why the downstream exchange did not produce a response.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("downstream did not answer within {0:?}")]
    Timeout(Duration),
    #[error("downstream connection failed: {0}")]
    Connect(String),
    #[error("request cannot be forwarded: {0}")]
    InvalidRequest(String),
    #[error("request body exceeds {0} bytes")]
    PayloadTooLarge(usize),
    #[error("request body could not be read: {0}")]
    RequestBody(String),
    #[error("downstream exchange failed: {0}")]
    Upstream(String),
}

impl ForwardError {
    /// Status returned to the client in place of a downstream response.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::InvalidRequest(_) | Self::RequestBody(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Connect(_) | Self::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn from_reqwest(error: &reqwest::Error, timeout: Duration) -> Self {
        if error.is_timeout() {
            Self::Timeout(timeout)
        } else if error.is_connect() {
            Self::Connect(error.to_string())
        } else if error.is_builder() {
            Self::InvalidRequest(error.to_string())
        } else {
            Self::Upstream(error.to_string())
        }
    }
}

impl IntoResponse for ForwardError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// What the downstream service answered.
#[derive(Debug)]
pub struct DownstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ResponseStatus for DownstreamResponse {
    fn status_code(&self) -> u16 {
        self.status.as_u16()
    }
}

impl IntoResponse for DownstreamResponse {
    fn into_response(self) -> Response {
        (self.status, self.headers, self.body).into_response()
    }
}

/// The gateway's single terminal operation.
#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn forward(
        &self,
        request: RequestDescriptor,
        body: Bytes,
    ) -> Result<DownstreamResponse, ForwardError>;
}

// ---------------------------------------------------------------------------
// HttpForwarder
// ---------------------------------------------------------------------------

/// Forwards to one upstream base URL over HTTP.
#[derive(Debug, Clone)]
pub struct HttpForwarder {
    client: reqwest::Client,
    upstream: Url,
    timeout: Duration,
}

impl HttpForwarder {
    /// Builds the pooled client.
    ///
    /// # Errors
    ///
    /// Fails when the TLS backend cannot be initialised.
    pub fn new(config: &ForwardConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(32)
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()?;
        Ok(Self {
            client,
            upstream: config.upstream.clone(),
            timeout: config.timeout,
        })
    }

    /// Appends the request path to the upstream base path and attaches the
    /// query as received.
    ///
    /// The path is never resolved as a URL reference, so scheme-like or
    /// `//`-prefixed paths stay on the upstream host.
    fn target_url(&self, request: &RequestDescriptor) -> Result<Url, ForwardError> {
        let path = request.path();
        if !path.starts_with('/') {
            return Err(ForwardError::InvalidRequest(format!(
                "request path is not absolute: {path}"
            )));
        }

        let mut url = self.upstream.clone();
        let base = self.upstream.path().trim_end_matches('/');
        url.set_path(&format!("{base}{path}"));
        url.set_fragment(None);
        // Dot segments are normalised by `set_path` and must not climb out of
        // the base path.
        if !url.path().starts_with(&format!("{base}/")) {
            return Err(ForwardError::InvalidRequest(format!(
                "request path escapes the upstream base: {path}"
            )));
        }

        match request.raw_query() {
            Some(raw) => url.set_query(Some(raw)),
            None if request.query().is_empty() => url.set_query(None),
            // Descriptors built without a wire query string.
            None => {
                let mut pairs = url::form_urlencoded::Serializer::new(String::new());
                for (key, values) in request.query().iter() {
                    for value in values {
                        pairs.append_pair(key, &String::from_utf8_lossy(value.as_bytes()));
                    }
                }
                url.set_query(Some(&pairs.finish()));
            }
        }
        Ok(url)
    }
}

/// Copies forwardable headers from the descriptor into a wire header map.
fn outbound_headers(request: &RequestDescriptor) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, values) in request.headers().iter() {
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            continue;
        };
        if is_hop_by_hop(&name) || name == header::HOST || name == header::CONTENT_LENGTH {
            continue;
        }
        for value in values {
            if let Ok(value) = HeaderValue::from_bytes(value.as_bytes()) {
                headers.append(name.clone(), value);
            }
        }
    }
    headers
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
    headers.remove(header::CONTENT_LENGTH);
}

#[async_trait]
impl Forwarder for HttpForwarder {
    async fn forward(
        &self,
        request: RequestDescriptor,
        body: Bytes,
    ) -> Result<DownstreamResponse, ForwardError> {
        let url = self.target_url(&request)?;
        let method = reqwest::Method::from_bytes(request.method().as_str().as_bytes())
            .map_err(|e| ForwardError::InvalidRequest(e.to_string()))?;

        let span = info_span!("downstream", %method, url = %url);
        let response = self
            .client
            .request(method, url)
            .headers(outbound_headers(&request))
            .body(body)
            .send()
            .instrument(span)
            .await
            .map_err(|e| ForwardError::from_reqwest(&e, self.timeout))?;

        let status = response.status();
        let mut headers = response.headers().clone();
        strip_hop_by_hop(&mut headers);
        let body = response
            .bytes()
            .await
            .map_err(|e| ForwardError::from_reqwest(&e, self.timeout))?;

        debug!(status = status.as_u16(), body_size = body.len(), "downstream answered");
        Ok(DownstreamResponse {
            status,
            headers,
            body,
        })
    }
}
