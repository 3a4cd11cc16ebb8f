//! End-to-end properties of the gateway pipeline: correlation, audit
//! completeness, failure propagation, preflight handling, and isolation
//! between concurrent requests.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use learnms_core::{AuditStatus, Method, RedactionPolicy, RequestDescriptor, MASK};
use learnms_gateway::config::{ForwardConfig, PipelineConfig};
use learnms_gateway::forward::{DownstreamResponse, ForwardError, Forwarder, HttpForwarder};
use learnms_gateway::network::{NetworkConfig, NetworkModule};
use learnms_gateway::pipeline::build_gateway_pipeline;
use learnms_gateway::sink::{AuditSink, ChannelAuditSink, MemoryAuditSink};
use parking_lot::Mutex;
use tokio::net::TcpListener;

const CORRELATION: &str = "X-Correlation-Id";

fn pipeline_config() -> PipelineConfig {
    PipelineConfig {
        redaction: Arc::new(RedactionPolicy::new(["Authorization", "api_key"])),
        ..PipelineConfig::default()
    }
}

fn correlation_of(request: &RequestDescriptor) -> Vec<String> {
    request
        .headers()
        .iter()
        .filter(|(k, _)| k.eq_ignore_ascii_case(CORRELATION))
        .flat_map(|(_, values)| values.iter().map(|v| v.as_str().unwrap().to_string()))
        .collect()
}

fn ok_response() -> DownstreamResponse {
    DownstreamResponse {
        status: StatusCode::OK,
        headers: HeaderMap::new(),
        body: Bytes::new(),
    }
}

/// Forwarder that remembers every request it was handed.
#[derive(Default)]
struct Recording {
    seen: Mutex<Vec<RequestDescriptor>>,
}

#[async_trait]
impl Forwarder for Recording {
    async fn forward(
        &self,
        request: RequestDescriptor,
        _body: Bytes,
    ) -> Result<DownstreamResponse, ForwardError> {
        // Stagger completions so concurrent requests interleave.
        let delay = request
            .query()
            .first("delay")
            .and_then(|v| v.as_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        self.seen.lock().push(request);
        Ok(ok_response())
    }
}

#[tokio::test]
async fn exactly_one_correlation_id_reaches_forward_and_record() {
    let memory = Arc::new(MemoryAuditSink::new());
    let pipeline = build_gateway_pipeline(&pipeline_config(), Arc::clone(&memory) as Arc<dyn AuditSink>);
    let forwarder = Recording::default();

    let request = RequestDescriptor::builder(Method::Get, "/students")
        .header("x-correlation-id", "first")
        .header("X-CORRELATION-ID", "second")
        .build();
    pipeline
        .handle(request, |enriched| forwarder.forward(enriched, Bytes::new()))
        .await
        .unwrap();

    let seen = forwarder.seen.lock();
    let ids = correlation_of(&seen[0]);
    assert_eq!(ids, vec!["first".to_string()]);

    let records = memory.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].correlation_id.as_str(), "first");
    assert_eq!(records[0].status, AuditStatus::Success);
    assert_eq!(records[0].status_code, Some(200));
}

#[tokio::test]
async fn connection_failure_is_audited_and_reraised_unchanged() {
    // Reserve a port, then release it so nothing listens there.
    let dead = TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap();
    let forwarder = HttpForwarder::new(&ForwardConfig {
        upstream: url::Url::parse(&format!("http://{dead}/")).unwrap(),
        timeout: Duration::from_secs(5),
    })
    .unwrap();

    let memory = Arc::new(MemoryAuditSink::new());
    let pipeline = build_gateway_pipeline(&pipeline_config(), Arc::clone(&memory) as Arc<dyn AuditSink>);

    let request = RequestDescriptor::builder(Method::Post, "/courses").build();
    let err = pipeline
        .handle(request, |enriched| forwarder.forward(enriched, Bytes::new()))
        .await
        .unwrap_err();

    let ForwardError::Connect(detail) = &err else {
        panic!("expected connect error, got {err:?}");
    };
    assert!(!detail.is_empty());

    let records = memory.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, AuditStatus::Error);
    assert_eq!(records[0].status_message.as_deref(), Some(err.to_string().as_str()));
    assert!(records[0].status_code.is_none());
}

#[tokio::test]
async fn options_request_is_correlated_but_not_audited() {
    let memory = Arc::new(MemoryAuditSink::new());
    let pipeline = build_gateway_pipeline(&pipeline_config(), Arc::clone(&memory) as Arc<dyn AuditSink>);
    let forwarder = Recording::default();

    let request = RequestDescriptor::builder(Method::Options, "/students").build();
    pipeline
        .handle(request, |enriched| forwarder.forward(enriched, Bytes::new()))
        .await
        .unwrap();

    let seen = forwarder.seen.lock();
    assert_eq!(correlation_of(&seen[0]).len(), 1);
    assert!(memory.records().is_empty());
    assert_eq!(memory.summaries().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_do_not_cross_contaminate() {
    const REQUESTS: usize = 100;

    let memory = Arc::new(MemoryAuditSink::new());
    let pipeline = Arc::new(build_gateway_pipeline(
        &pipeline_config(),
        Arc::clone(&memory) as Arc<dyn AuditSink>,
    ));
    let forwarder = Arc::new(Recording::default());

    let tasks: Vec<_> = (0..REQUESTS)
        .map(|i| {
            let pipeline = Arc::clone(&pipeline);
            let forwarder = Arc::clone(&forwarder);
            tokio::spawn(async move {
                let request = RequestDescriptor::builder(Method::Get, format!("/students/{i}"))
                    .header(CORRELATION, format!("req-{i}"))
                    .header("X-Student", i.to_string())
                    .header("Authorization", format!("Bearer token-{i}"))
                    .query_param("delay", ((i * 7) % 23).to_string())
                    .build();
                pipeline
                    .handle(request, |enriched| async move {
                        forwarder.forward(enriched, Bytes::new()).await
                    })
                    .await
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let records = memory.records();
    assert_eq!(records.len(), REQUESTS);

    let mut ids = HashSet::new();
    for record in &records {
        let i: usize = record
            .correlation_id
            .as_str()
            .strip_prefix("req-")
            .unwrap()
            .parse()
            .unwrap();
        assert!(ids.insert(i), "duplicate record for request {i}");
        assert_eq!(record.path, format!("/students/{i}"));
        assert_eq!(record.headers["X-Student"], i.to_string());
        assert_eq!(record.headers[CORRELATION], format!("req-{i}"));
        assert_eq!(record.headers["Authorization"], MASK);
        assert_eq!(record.query["delay"], ((i * 7) % 23).to_string());
        // Each record timed its own forward, not a neighbour's.
        assert!(record.duration_ms >= ((i * 7) % 23) as u64);
        assert!(record.started_at_ms <= record.completed_at_ms());
    }

    let forwarded: HashSet<_> = forwarder
        .seen
        .lock()
        .iter()
        .map(|r| correlation_of(r).join(","))
        .collect();
    assert_eq!(forwarded.len(), REQUESTS);
    assert_eq!(pipeline.in_flight_count(), 0);
}

#[tokio::test]
async fn full_stack_over_http_with_background_writer() {
    // Downstream: echoes the correlation header it received.
    let upstream = axum::Router::new().fallback(|headers: HeaderMap| async move {
        headers
            .get("x-correlation-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    });
    let upstream_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = upstream_listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(upstream_listener, upstream).await });

    let memory = Arc::new(MemoryAuditSink::new());
    let (channel, mut writer) =
        ChannelAuditSink::spawn(Arc::clone(&memory) as Arc<dyn AuditSink>, 64);
    let config = PipelineConfig::default();
    let pipeline = Arc::new(build_gateway_pipeline(&config, Arc::new(channel)));
    let forwarder = Arc::new(
        HttpForwarder::new(&ForwardConfig {
            upstream: url::Url::parse(&format!("http://{upstream_addr}/")).unwrap(),
            timeout: Duration::from_secs(5),
        })
        .unwrap(),
    );

    let mut gateway = NetworkModule::new(
        NetworkConfig {
            host: "127.0.0.1".to_string(),
            ..NetworkConfig::default()
        },
        pipeline,
        forwarder,
        &config.identity_header,
    );
    let addr = gateway.start().await.unwrap();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(gateway.serve(async move {
        let _ = stop_rx.await;
    }));

    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    let response = client
        .get(format!("http://{addr}/students?api_key=k1"))
        .header("authorization", "Bearer secret")
        .header("x-authenticated-user", "grace")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let echoed = response.headers()["x-correlation-id"]
        .to_str()
        .unwrap()
        .to_string();
    assert_eq!(response.text().await.unwrap(), echoed);

    // Probes bypass the pipeline.
    let health = client
        .get(format!("http://{addr}/health/live"))
        .send()
        .await
        .unwrap();
    assert_eq!(health.status(), reqwest::StatusCode::OK);
    assert!(health.headers().get("x-correlation-id").is_none());

    stop_tx.send(()).unwrap();
    server.await.unwrap().unwrap();
    writer.stop().await;

    let records = memory.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].correlation_id.as_str(), echoed);
    assert_eq!(records[0].headers["authorization"], MASK);
    assert_eq!(records[0].remote_address.as_deref(), Some("127.0.0.1"));
    assert_eq!(memory.summaries()[0].user, "grace");
}
