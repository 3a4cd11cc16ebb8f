//! Catch-all proxy handler: every non-probe request enters the pipeline here.

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::request::Parts;
use axum::http::{HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use learnms_core::{FieldValue, Method, MultiMap, Principal, RequestDescriptor};

use super::AppState;
use crate::forward::ForwardError;

/// Converts the wire request into a descriptor, runs it through the pipeline
/// with body buffering plus the forwarder as terminal step, and copies the
/// correlation id onto the response.
pub async fn gateway_handler(State(state): State<AppState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let descriptor = describe(&parts, &state.identity_header);
    let body_limit = state.config.body_limit;

    let header = state.pipeline.correlation().header_name().to_string();
    let mut correlation: Option<FieldValue> = None;
    let forwarder = &state.forwarder;

    let result = state
        .pipeline
        .handle(descriptor, |enriched| {
            correlation = enriched.headers().first(&header).cloned();
            async move {
                let body = read_body(body, body_limit).await?;
                forwarder.forward(enriched, body).await
            }
        })
        .await;

    let mut response = match result {
        Ok(downstream) => downstream.into_response(),
        Err(error) => error.into_response(),
    };

    if let (Ok(name), Some(value)) = (
        HeaderName::try_from(header),
        correlation.and_then(|v| HeaderValue::from_bytes(v.as_bytes()).ok()),
    ) {
        response.headers_mut().insert(name, value);
    }
    response
}

/// Buffers the request body, failing once it grows past `limit` bytes.
async fn read_body(body: Body, limit: usize) -> Result<Bytes, ForwardError> {
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(error) if error.is::<LengthLimitError>() => Err(ForwardError::PayloadTooLarge(limit)),
        Err(error) => Err(ForwardError::RequestBody(error.to_string())),
    }
}

/// Snapshot of the parts the pipeline inspects.
fn describe(parts: &Parts, identity_header: &str) -> RequestDescriptor {
    let mut headers = MultiMap::new();
    for (name, value) in &parts.headers {
        headers.append(name.as_str(), FieldValue::from_bytes(value.as_bytes()));
    }

    let raw_query = parts.uri.query();
    let query: MultiMap = raw_query
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect()
        })
        .unwrap_or_default();

    let principal = headers
        .first_ignore_case(identity_header)
        .and_then(|v| v.as_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| Principal { id: id.to_string() });

    let mut builder = RequestDescriptor::builder(Method::parse(parts.method.as_str()), parts.uri.path())
        .headers(headers)
        .query(query);
    if let Some(raw) = raw_query {
        builder = builder.raw_query(raw);
    }
    if let Some(ConnectInfo(addr)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
        builder = builder.remote_addr(addr.ip().to_string());
    }
    if let Some(principal) = principal {
        builder = builder.principal(principal);
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Instant;

    use async_trait::async_trait;
    use axum::http::StatusCode;
    use axum::Router;
    use bytes::Bytes;
    use learnms_core::{AuditStatus, MASK};
    use parking_lot::Mutex;
    use tower::ServiceExt;

    use super::*;
    use crate::config::PipelineConfig;
    use crate::forward::{DownstreamResponse, ForwardError, Forwarder};
    use crate::network::{NetworkConfig, ShutdownController};
    use crate::pipeline::build_gateway_pipeline;
    use crate::sink::MemoryAuditSink;

    /// Records what it was asked to forward and answers with a fixed result.
    #[derive(Default)]
    struct StubForwarder {
        fail: bool,
        seen: Mutex<Vec<(RequestDescriptor, Bytes)>>,
    }

    #[async_trait]
    impl Forwarder for StubForwarder {
        async fn forward(
            &self,
            request: RequestDescriptor,
            body: Bytes,
        ) -> Result<DownstreamResponse, ForwardError> {
            self.seen.lock().push((request, body));
            if self.fail {
                return Err(ForwardError::Connect("connection refused".into()));
            }
            Ok(DownstreamResponse {
                status: StatusCode::OK,
                headers: axum::http::HeaderMap::new(),
                body: Bytes::from_static(b"[]"),
            })
        }
    }

    fn router(forwarder: Arc<StubForwarder>) -> (Router, Arc<MemoryAuditSink>) {
        router_with(forwarder, NetworkConfig::default())
    }

    fn router_with(
        forwarder: Arc<StubForwarder>,
        config: NetworkConfig,
    ) -> (Router, Arc<MemoryAuditSink>) {
        let memory = Arc::new(MemoryAuditSink::new());
        let pipeline = Arc::new(build_gateway_pipeline(
            &PipelineConfig::default(),
            Arc::clone(&memory) as Arc<dyn crate::sink::AuditSink>,
        ));
        let state = AppState {
            shutdown: Arc::new(ShutdownController::new(pipeline.in_flight_counter())),
            pipeline,
            forwarder,
            identity_header: Arc::from("X-Authenticated-User"),
            config: Arc::new(config),
            start_time: Instant::now(),
        };
        let router = Router::new().fallback(gateway_handler).with_state(state);
        (router, memory)
    }

    #[tokio::test]
    async fn proxies_and_echoes_correlation_header() {
        let forwarder = Arc::new(StubForwarder::default());
        let (app, memory) = router(Arc::clone(&forwarder));

        let request = Request::builder()
            .method("POST")
            .uri("/students?page=2")
            .header("authorization", "Bearer secret")
            .header("x-authenticated-user", "ada")
            .body(Body::from("{\"name\":\"Ada\"}"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let echoed = response.headers()["x-correlation-id"].to_str().unwrap().to_string();

        let seen = forwarder.seen.lock();
        let (forwarded, body) = &seen[0];
        assert_eq!(body, &Bytes::from_static(b"{\"name\":\"Ada\"}"));
        assert_eq!(
            forwarded.headers().first("X-Correlation-Id").unwrap().as_str().unwrap(),
            echoed
        );
        assert_eq!(forwarded.principal().map(|p| p.id.as_str()), Some("ada"));

        let records = memory.records();
        assert_eq!(records[0].correlation_id.as_str(), echoed);
        assert_eq!(records[0].headers["authorization"], MASK);
        assert_eq!(records[0].query["page"], "2");
        assert_eq!(memory.summaries()[0].user, "ada");
    }

    #[tokio::test]
    async fn inbound_correlation_id_reused() {
        let (app, memory) = router(Arc::new(StubForwarder::default()));

        let request = Request::builder()
            .uri("/courses")
            .header("x-correlation-id", "abc-123")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.headers()["x-correlation-id"], "abc-123");
        assert_eq!(memory.records()[0].correlation_id.as_str(), "abc-123");
    }

    #[tokio::test]
    async fn forward_failure_maps_to_bad_gateway_and_error_record() {
        let forwarder = Arc::new(StubForwarder {
            fail: true,
            ..StubForwarder::default()
        });
        let (app, memory) = router(forwarder);

        let request = Request::builder().uri("/address/9").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(response.headers().contains_key("x-correlation-id"));
        let records = memory.records();
        assert_eq!(records[0].status, AuditStatus::Error);
        assert_eq!(
            records[0].status_message.as_deref(),
            Some("downstream connection failed: connection refused")
        );
    }

    #[tokio::test]
    async fn anonymous_without_identity_header() {
        let (app, memory) = router(Arc::new(StubForwarder::default()));

        let request = Request::builder().uri("/students").body(Body::empty()).unwrap();
        app.oneshot(request).await.unwrap();

        assert_eq!(memory.summaries()[0].user, learnms_core::ANONYMOUS_USER);
    }

    #[tokio::test]
    async fn oversized_body_is_correlated_and_audited() {
        let forwarder = Arc::new(StubForwarder::default());
        let (app, memory) = router_with(
            Arc::clone(&forwarder),
            NetworkConfig {
                body_limit: 16,
                ..NetworkConfig::default()
            },
        );

        let request = Request::builder()
            .method("POST")
            .uri("/students")
            .body(Body::from(vec![b'x'; 64]))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let echoed = response.headers()["x-correlation-id"].to_str().unwrap().to_string();
        assert!(forwarder.seen.lock().is_empty());

        let records = memory.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].correlation_id.as_str(), echoed);
        assert_eq!(records[0].status, AuditStatus::Error);
        assert_eq!(
            records[0].status_message.as_deref(),
            Some("request body exceeds 16 bytes")
        );
    }

    #[tokio::test]
    async fn interrupted_upload_is_audited_as_error() {
        let forwarder = Arc::new(StubForwarder::default());
        let (app, memory) = router(Arc::clone(&forwarder));

        let chunks = futures_util::stream::iter(vec![
            Ok(Bytes::from_static(b"abc")),
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "peer went away",
            )),
        ]);
        let request = Request::builder()
            .method("PUT")
            .uri("/courses/4")
            .body(Body::from_stream(chunks))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(forwarder.seen.lock().is_empty());
        let records = memory.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, AuditStatus::Error);
        assert!(records[0]
            .status_message
            .as_deref()
            .unwrap()
            .starts_with("request body could not be read"));
    }

    #[tokio::test]
    async fn raw_query_reaches_forwarder_untouched() {
        let forwarder = Arc::new(StubForwarder::default());
        let (app, memory) = router(Arc::clone(&forwarder));

        let request = Request::builder()
            .uri("/students?flag&raw=%FF&api_key=k")
            .body(Body::empty())
            .unwrap();
        app.oneshot(request).await.unwrap();

        let seen = forwarder.seen.lock();
        assert_eq!(seen[0].0.raw_query(), Some("flag&raw=%FF&api_key=k"));
        assert_eq!(memory.records()[0].query["flag"], "");
    }

    #[tokio::test]
    async fn remote_address_is_host_only() {
        let forwarder = Arc::new(StubForwarder::default());
        let (app, memory) = router(Arc::clone(&forwarder));

        let mut request = Request::builder().uri("/address").body(Body::empty()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([10, 1, 2, 3], 54321))));
        app.oneshot(request).await.unwrap();

        assert_eq!(memory.records()[0].remote_address.as_deref(), Some("10.1.2.3"));
    }
}
