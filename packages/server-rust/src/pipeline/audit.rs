//! Detailed request/response audit.
//!
//! The pre-phase snapshots the (redacted) request into an [`AuditDraft`] held
//! by the exchange; the post-phase closes it with the outcome and hands the
//! record to the audit sink.

use std::fmt;
use std::sync::Arc;

use learnms_core::{AuditDraft, AuditStatus, RedactionPolicy};
use regex::Regex;
use tracing::debug;

use super::interceptor::{priority, Completion, Exchange, Interceptor, InterceptorError, Outcome};
use crate::sink::AuditSink;

/// Paths whose successful requests are not audited (management endpoints).
pub const DEFAULT_QUIET_PATHS: &str = r"^/actuator/[/\w]*$";

pub struct AuditInterceptor {
    policy: Arc<RedactionPolicy>,
    sink: Arc<dyn AuditSink>,
    quiet_paths: Option<Regex>,
}

impl AuditInterceptor {
    #[must_use]
    pub fn new(policy: Arc<RedactionPolicy>, sink: Arc<dyn AuditSink>) -> Self {
        Self {
            policy,
            sink,
            quiet_paths: None,
        }
    }

    /// Successful requests whose path matches `pattern` are not emitted.
    /// Failed requests are always emitted.
    #[must_use]
    pub fn with_quiet_paths(mut self, pattern: Regex) -> Self {
        self.quiet_paths = Some(pattern);
        self
    }

    fn is_quiet(&self, path: &str) -> bool {
        self.quiet_paths.as_ref().is_some_and(|re| re.is_match(path))
    }
}

impl fmt::Debug for AuditInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditInterceptor")
            .field("redacted_fields", &self.policy.len())
            .field("quiet_paths", &self.quiet_paths.as_ref().map(Regex::as_str))
            .finish_non_exhaustive()
    }
}

impl Interceptor for AuditInterceptor {
    fn name(&self) -> &'static str {
        "audit"
    }

    fn priority(&self) -> i32 {
        priority::AUDIT
    }

    fn before(&self, exchange: &mut Exchange) -> Result<(), InterceptorError> {
        // Preflight calls are forwarded but never audited.
        if exchange.request().method().is_preflight() {
            return Ok(());
        }
        let id = exchange
            .correlation_id()
            .cloned()
            .ok_or(InterceptorError::MissingCorrelation { stage: "audit capture" })?;
        let draft = AuditDraft::capture(exchange.request(), id, &self.policy, exchange.started_at());
        exchange.set_audit(draft);
        Ok(())
    }

    fn after(
        &self,
        exchange: &mut Exchange,
        completion: &Completion,
    ) -> Result<(), InterceptorError> {
        let Some(draft) = exchange.take_audit() else {
            return Ok(());
        };

        let record = match &completion.outcome {
            Outcome::Success { status } => draft.complete_success(*status, completion.elapsed),
            Outcome::Failure { message } => {
                draft.complete_error(message.as_str(), completion.elapsed)
            }
        };

        if record.status == AuditStatus::Success && self.is_quiet(&record.path) {
            debug!(path = %record.path, "quiet path, audit record not emitted");
            return Ok(());
        }

        self.sink.emit(record)?;
        Ok(())
    }
}
