//! The interceptor contract and the request-scoped state it works on.

use std::time::{Duration, Instant, SystemTime};

use learnms_core::{AuditDraft, CorrelationId, RequestDescriptor};

use crate::sink::AuditError;

/// Failure message recorded when the client goes away before the downstream
/// call settles.
pub const CANCELLED_MESSAGE: &str = "client cancelled request";

/// Canonical interceptor priorities. Lower runs earlier on the way in.
pub mod priority {
    /// Correlation assignment runs before everything else.
    pub const CORRELATION: i32 = i32::MIN;
    /// Detailed request/response audit.
    pub const AUDIT: i32 = i32::MIN + 1;
    /// Coarse per-request summary line.
    pub const SUMMARY: i32 = -1;
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure raised by an interceptor phase.
///
/// The orchestrator logs these and moves on; they never reach the caller.
#[derive(Debug, thiserror::Error)]
pub enum InterceptorError {
    #[error("correlation id already assigned to this request")]
    CorrelationAlreadyAssigned,
    #[error("no correlation id assigned before {stage}")]
    MissingCorrelation { stage: &'static str },
    #[error("audit sink rejected output: {0}")]
    Sink(#[from] AuditError),
}

// ---------------------------------------------------------------------------
// Response status
// ---------------------------------------------------------------------------

/// Exposes the HTTP status of whatever the terminal forward returns.
pub trait ResponseStatus {
    fn status_code(&self) -> u16;
}

impl<B> ResponseStatus for http::Response<B> {
    fn status_code(&self) -> u16 {
        self.status().as_u16()
    }
}

// ---------------------------------------------------------------------------
// Completion
// ---------------------------------------------------------------------------

/// How the terminal forward settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The downstream answered (any status code, including 4xx/5xx).
    Success { status: u16 },
    /// The forward failed or the client cancelled.
    Failure { message: String },
}

/// The single completion event observed by every post-phase.
#[derive(Debug, Clone)]
pub struct Completion {
    pub outcome: Outcome,
    pub elapsed: Duration,
}

impl Completion {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success { .. })
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        if self.is_success() {
            "success"
        } else {
            "error"
        }
    }
}

// ---------------------------------------------------------------------------
// Exchange
// ---------------------------------------------------------------------------

/// Request-scoped state threaded through one pipeline run.
///
/// Owned by exactly one in-flight request and dropped when it completes.
#[derive(Debug)]
pub struct Exchange {
    request: RequestDescriptor,
    correlation_id: Option<CorrelationId>,
    audit: Option<AuditDraft>,
    started: Instant,
    started_at: SystemTime,
}

impl Exchange {
    #[must_use]
    pub fn new(request: RequestDescriptor) -> Self {
        Self {
            request,
            correlation_id: None,
            audit: None,
            started: Instant::now(),
            started_at: SystemTime::now(),
        }
    }

    /// The request as it will be forwarded (after any enrichment so far).
    #[must_use]
    pub fn request(&self) -> &RequestDescriptor {
        &self.request
    }

    #[must_use]
    pub fn correlation_id(&self) -> Option<&CorrelationId> {
        self.correlation_id.as_ref()
    }

    /// Attaches the correlation id together with the request that carries it.
    ///
    /// # Errors
    ///
    /// Returns [`InterceptorError::CorrelationAlreadyAssigned`] if an id is
    /// already attached; the existing id and request are kept.
    pub fn attach_correlation(
        &mut self,
        enriched: RequestDescriptor,
        id: CorrelationId,
    ) -> Result<(), InterceptorError> {
        if self.correlation_id.is_some() {
            return Err(InterceptorError::CorrelationAlreadyAssigned);
        }
        self.request = enriched;
        self.correlation_id = Some(id);
        Ok(())
    }

    /// Wall-clock time the request entered the pipeline.
    #[must_use]
    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn set_audit(&mut self, draft: AuditDraft) {
        self.audit = Some(draft);
    }

    pub fn take_audit(&mut self) -> Option<AuditDraft> {
        self.audit.take()
    }
}

// ---------------------------------------------------------------------------
// Interceptor
// ---------------------------------------------------------------------------

/// A unit of cross-cutting request/response behavior.
///
/// Both phases are synchronous and must not block: the only suspension point
/// in a pipeline run is the terminal forward. Ordering is data: the
/// orchestrator sorts by [`Interceptor::priority`], ties keep registration
/// order.
pub trait Interceptor: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    fn priority(&self) -> i32;

    /// Runs before the forward, in ascending priority order.
    ///
    /// # Errors
    ///
    /// Any error is logged by the orchestrator and the chain continues.
    fn before(&self, _exchange: &mut Exchange) -> Result<(), InterceptorError> {
        Ok(())
    }

    /// Runs after the forward settles, in descending priority order.
    ///
    /// # Errors
    ///
    /// Any error is logged by the orchestrator and the chain continues.
    fn after(
        &self,
        _exchange: &mut Exchange,
        _completion: &Completion,
    ) -> Result<(), InterceptorError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use learnms_core::Method;

    use super::*;

    #[test]
    fn priorities_follow_canonical_order() {
        assert!(priority::CORRELATION < priority::AUDIT);
        assert!(priority::AUDIT < priority::SUMMARY);
    }

    #[test]
    fn attach_correlation_only_once() {
        let request = RequestDescriptor::builder(Method::Get, "/").build();
        let mut exchange = Exchange::new(request.clone());

        let first = CorrelationId::parse("first").unwrap();
        exchange
            .attach_correlation(request.with_header("X-Correlation-Id", "first"), first.clone())
            .unwrap();

        let err = exchange
            .attach_correlation(request, CorrelationId::parse("second").unwrap())
            .unwrap_err();
        assert!(matches!(err, InterceptorError::CorrelationAlreadyAssigned));
        assert_eq!(exchange.correlation_id(), Some(&first));
        assert!(exchange.request().headers().first("X-Correlation-Id").is_some());
    }

    #[test]
    fn completion_labels() {
        let ok = Completion {
            outcome: Outcome::Success { status: 404 },
            elapsed: Duration::ZERO,
        };
        let failed = Completion {
            outcome: Outcome::Failure {
                message: CANCELLED_MESSAGE.to_string(),
            },
            elapsed: Duration::ZERO,
        };
        assert!(ok.is_success());
        assert_eq!(ok.label(), "success");
        assert_eq!(failed.label(), "error");
    }

    #[test]
    fn http_response_status() {
        let response = http::Response::builder().status(503).body(()).unwrap();
        assert_eq!(response.status_code(), 503);
    }
}
