//! learnms gateway binary.
//!
//! Parses configuration, installs tracing and (optionally) the Prometheus
//! exporter, wires the audit writer and forwarder into the pipeline, and
//! serves until SIGINT/SIGTERM.

use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use learnms_gateway::config::GatewayArgs;
use learnms_gateway::forward::HttpForwarder;
use learnms_gateway::logging::init_tracing;
use learnms_gateway::network::NetworkModule;
use learnms_gateway::pipeline::build_gateway_pipeline;
use learnms_gateway::sink::{AuditSink, ChannelAuditSink, TracingAuditSink};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = GatewayArgs::parse()
        .into_config()
        .context("invalid gateway configuration")?;

    init_tracing(config.log_format)?;

    if let Some(addr) = config.metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to install Prometheus exporter")?;
        info!(%addr, "metrics exporter listening");
    }

    let (audit_sink, mut audit_writer) = ChannelAuditSink::spawn(
        Arc::new(TracingAuditSink),
        config.pipeline.audit_queue_capacity,
    );
    let audit_sink: Arc<dyn AuditSink> = Arc::new(audit_sink);

    let pipeline = Arc::new(build_gateway_pipeline(&config.pipeline, audit_sink));
    let forwarder = Arc::new(
        HttpForwarder::new(&config.forward).context("failed to build downstream client")?,
    );

    info!(
        upstream = %config.forward.upstream,
        interceptors = ?pipeline.interceptor_names(),
        redacted_fields = config.pipeline.redaction.len(),
        "gateway starting"
    );

    let mut network = NetworkModule::new(
        config.network,
        pipeline,
        forwarder,
        &config.pipeline.identity_header,
    );
    network.start().await?;
    network.serve(shutdown_signal()).await?;

    audit_writer.stop().await;
    info!("gateway stopped");
    Ok(())
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::error!(%error, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}
