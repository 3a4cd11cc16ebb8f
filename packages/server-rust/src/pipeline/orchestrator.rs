//! Runs the interceptor chain around the terminal forward.
//!
//! One pipeline run is a small state machine:
//!
//! 1. pre-phases, ascending priority (synchronous)
//! 2. terminal forward (the only await point)
//! 3. post-phases, descending priority, all observing one [`Completion`]
//!
//! Step 3 is driven by an [`InFlight`] guard, so it also runs when the
//! request future is dropped mid-forward (client disconnect).

use std::fmt::{self, Display};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use learnms_core::{CorrelationContext, RequestDescriptor};
use tracing::{debug, info, info_span, warn, Instrument, Span};

use super::interceptor::{
    priority, Completion, Exchange, Interceptor, Outcome, ResponseStatus, CANCELLED_MESSAGE,
};

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Ordered interceptor chain plus the bookkeeping shared by all requests.
///
/// Shared read-only across requests (wrap in `Arc`); all per-request state
/// lives in the [`Exchange`] created by [`Pipeline::handle`].
pub struct Pipeline {
    interceptors: Vec<Arc<dyn Interceptor>>,
    correlation: CorrelationContext,
    in_flight: Arc<AtomicU64>,
}

impl Pipeline {
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Interceptor names in execution (pre-phase) order.
    #[must_use]
    pub fn interceptor_names(&self) -> Vec<&'static str> {
        self.interceptors.iter().map(|i| i.name()).collect()
    }

    #[must_use]
    pub fn correlation(&self) -> &CorrelationContext {
        &self.correlation
    }

    /// Number of requests currently between pipeline entry and completion.
    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Shared handle to the in-flight counter, used for shutdown draining.
    #[must_use]
    pub fn in_flight_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.in_flight)
    }

    /// Runs one request through the chain.
    ///
    /// `forward` receives the enriched request and performs the downstream
    /// call. Its error is returned to the caller unchanged, after every
    /// post-phase has observed it.
    ///
    /// # Errors
    ///
    /// Returns exactly the error produced by `forward`. Interceptor failures
    /// are logged and never surface here.
    pub async fn handle<F, Fut, R, E>(&self, request: RequestDescriptor, forward: F) -> Result<R, E>
    where
        F: FnOnce(RequestDescriptor) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        R: ResponseStatus,
        E: Display,
    {
        let span = info_span!(
            "gateway_request",
            method = %request.method(),
            path = request.path(),
            correlation_id = tracing::field::Empty,
        );

        let mut exchange = Exchange::new(request);
        let forwarded = span.in_scope(|| {
            self.run_before(&mut exchange);
            exchange.request().clone()
        });
        if let Some(id) = exchange.correlation_id() {
            span.record("correlation_id", id.as_str());
        }

        let guard = InFlight::new(self, exchange, span.clone());
        let result = forward(forwarded).instrument(span).await;

        let outcome = match &result {
            Ok(response) => Outcome::Success {
                status: response.status_code(),
            },
            Err(error) => Outcome::Failure {
                message: error.to_string(),
            },
        };
        guard.complete(outcome);
        result
    }

    /// Runs the pre-phases. Every interceptor ordered after correlation
    /// assignment sees an id, even when no interceptor assigns one.
    fn run_before(&self, exchange: &mut Exchange) {
        for interceptor in &self.interceptors {
            if interceptor.priority() > priority::CORRELATION {
                self.ensure_correlation(exchange);
            }
            if let Err(error) = interceptor.before(exchange) {
                warn!(
                    interceptor = interceptor.name(),
                    correlation_id = exchange.correlation_id().map(|id| id.as_str()),
                    %error,
                    "interceptor pre-phase failed, continuing"
                );
            }
        }
        self.ensure_correlation(exchange);
    }

    /// Assigns a correlation id when no interceptor has done so yet.
    fn ensure_correlation(&self, exchange: &mut Exchange) {
        if exchange.correlation_id().is_some() {
            return;
        }
        let (enriched, id) = self.correlation.assign(exchange.request());
        debug!(correlation_id = %id, "no interceptor assigned a correlation id, assigning one");
        if let Err(error) = exchange.attach_correlation(enriched, id) {
            warn!(%error, "could not attach fallback correlation id");
        }
    }

    fn run_after(&self, exchange: &mut Exchange, outcome: Outcome) {
        let completion = Completion {
            outcome,
            elapsed: exchange.elapsed(),
        };

        for interceptor in self.interceptors.iter().rev() {
            if let Err(error) = interceptor.after(exchange, &completion) {
                warn!(
                    interceptor = interceptor.name(),
                    correlation_id = exchange.correlation_id().map(|id| id.as_str()),
                    %error,
                    "interceptor post-phase failed, continuing"
                );
            }
        }

        metrics::counter!("gateway_requests_total", "outcome" => completion.label()).increment(1);
        metrics::histogram!("gateway_request_duration_seconds")
            .record(completion.elapsed.as_secs_f64());
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("interceptors", &self.interceptor_names())
            .field("correlation_header", &self.correlation.header_name())
            .field("in_flight", &self.in_flight_count())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// PipelineBuilder
// ---------------------------------------------------------------------------

/// Collects interceptors and orders them by priority.
#[derive(Default)]
pub struct PipelineBuilder {
    correlation: CorrelationContext,
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl PipelineBuilder {
    /// Correlation context used when no interceptor assigns an id.
    #[must_use]
    pub fn correlation(mut self, correlation: CorrelationContext) -> Self {
        self.correlation = correlation;
        self
    }

    #[must_use]
    pub fn interceptor<I: Interceptor + 'static>(mut self, interceptor: I) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    #[must_use]
    pub fn shared_interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Sorts by ascending priority. The sort is stable, so equal priorities
    /// keep registration order.
    #[must_use]
    pub fn build(self) -> Pipeline {
        let mut interceptors = self.interceptors;
        interceptors.sort_by_key(|i| i.priority());
        Pipeline {
            interceptors,
            correlation: self.correlation,
            in_flight: Arc::new(AtomicU64::new(0)),
        }
    }
}

// ---------------------------------------------------------------------------
// InFlight guard
// ---------------------------------------------------------------------------

/// Owns the exchange while the forward is pending.
///
/// Completing the guard runs the post-phases with the real outcome. Dropping
/// it uncompleted (the request future was cancelled) runs them with a
/// cancellation failure instead.
struct InFlight<'a> {
    pipeline: &'a Pipeline,
    exchange: Option<Exchange>,
    span: Span,
}

impl<'a> InFlight<'a> {
    fn new(pipeline: &'a Pipeline, exchange: Exchange, span: Span) -> Self {
        pipeline.in_flight.fetch_add(1, Ordering::Relaxed);
        Self {
            pipeline,
            exchange: Some(exchange),
            span,
        }
    }

    fn complete(mut self, outcome: Outcome) {
        if let Some(mut exchange) = self.exchange.take() {
            let _entered = self.span.enter();
            self.pipeline.run_after(&mut exchange, outcome);
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(mut exchange) = self.exchange.take() {
            let _entered = self.span.enter();
            info!("client disconnected before downstream responded");
            self.pipeline.run_after(
                &mut exchange,
                Outcome::Failure {
                    message: CANCELLED_MESSAGE.to_string(),
                },
            );
        }
        self.pipeline.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
