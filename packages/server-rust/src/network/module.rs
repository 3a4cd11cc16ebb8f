//! Network module with deferred startup lifecycle.
//!
//! `new()` creates shared state, `start()` binds the TCP listener, and
//! `serve()` accepts connections until shutdown. Splitting bind from serve
//! lets callers learn the bound port (port 0 in tests) before traffic flows.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::config::NetworkConfig;
use super::handlers::{
    gateway_handler, health_handler, liveness_handler, readiness_handler, AppState,
};
use super::middleware::build_http_layers;
use super::shutdown::ShutdownController;
use crate::forward::Forwarder;
use crate::pipeline::Pipeline;

/// Manages the HTTP server lifecycle around one pipeline and forwarder.
pub struct NetworkModule {
    config: NetworkConfig,
    listener: Option<TcpListener>,
    pipeline: Arc<Pipeline>,
    forwarder: Arc<dyn Forwarder>,
    identity_header: Arc<str>,
    shutdown: Arc<ShutdownController>,
}

impl NetworkModule {
    /// Creates the module without binding any port.
    ///
    /// The shutdown controller observes the pipeline's in-flight counter, so
    /// draining waits for every request that still owes an audit record.
    #[must_use]
    pub fn new(
        config: NetworkConfig,
        pipeline: Arc<Pipeline>,
        forwarder: Arc<dyn Forwarder>,
        identity_header: &str,
    ) -> Self {
        let shutdown = Arc::new(ShutdownController::new(pipeline.in_flight_counter()));
        Self {
            config,
            listener: None,
            pipeline,
            forwarder,
            identity_header: Arc::from(identity_header),
            shutdown,
        }
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Assembles the axum router.
    ///
    /// Routes:
    /// - `GET /health` -- detailed health JSON
    /// - `GET /health/live` -- liveness probe
    /// - `GET /health/ready` -- readiness probe
    /// - everything else -- proxied through the pipeline
    pub fn build_router(&self) -> Router {
        let state = AppState {
            pipeline: Arc::clone(&self.pipeline),
            forwarder: Arc::clone(&self.forwarder),
            shutdown: Arc::clone(&self.shutdown),
            identity_header: Arc::clone(&self.identity_header),
            config: Arc::new(self.config.clone()),
            start_time: Instant::now(),
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .fallback(gateway_handler)
            .layer(build_http_layers())
            .with_state(state)
    }

    /// Binds the TCP listener to the configured host and port.
    ///
    /// Returns the actual bound address, whose port may differ from the
    /// configured one when port 0 is used.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound (e.g., port in use).
    pub async fn start(&mut self) -> anyhow::Result<SocketAddr> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let local = listener.local_addr()?;

        info!(%local, "gateway listener bound");

        self.listener = Some(listener);
        Ok(local)
    }

    /// Serves connections until `shutdown` resolves, then drains.
    ///
    /// After the shutdown signal the health state moves to Draining, the
    /// server stops accepting, and in-flight requests get up to
    /// `drain_timeout` to finish before the state moves to Stopped.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called first or the server hits
    /// a fatal I/O error.
    pub async fn serve(
        mut self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| anyhow::anyhow!("start() must be called before serve()"))?;
        let router = self.build_router();
        let controller = Arc::clone(&self.shutdown);

        controller.set_ready();
        info!("serving gateway traffic");

        let signal_controller = Arc::clone(&controller);
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown.await;
            signal_controller.trigger_shutdown();
        })
        .await?;

        if controller.wait_for_drain(self.config.drain_timeout).await {
            info!("all in-flight requests drained");
        } else {
            warn!(
                in_flight = controller.in_flight_count(),
                "drain timeout expired with in-flight requests remaining"
            );
        }
        Ok(())
    }
}
