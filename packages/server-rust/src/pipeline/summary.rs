//! Coarse per-request summary line for consumers that do not need the full
//! audit record.

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use learnms_core::AuditSummary;

use super::interceptor::{priority, Completion, Exchange, Interceptor, InterceptorError};
use crate::sink::AuditSink;

pub struct SummaryInterceptor {
    sink: Arc<dyn AuditSink>,
}

impl SummaryInterceptor {
    #[must_use]
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }
}

impl fmt::Debug for SummaryInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SummaryInterceptor").finish_non_exhaustive()
    }
}

impl Interceptor for SummaryInterceptor {
    fn name(&self) -> &'static str {
        "summary"
    }

    fn priority(&self) -> i32 {
        priority::SUMMARY
    }

    fn after(
        &self,
        exchange: &mut Exchange,
        _completion: &Completion,
    ) -> Result<(), InterceptorError> {
        let id = exchange
            .correlation_id()
            .cloned()
            .ok_or(InterceptorError::MissingCorrelation { stage: "summary" })?;
        let summary = AuditSummary::for_request(exchange.request(), id, SystemTime::now());
        self.sink.emit_summary(summary)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use learnms_core::{CorrelationContext, Method, Principal, RequestDescriptor, ANONYMOUS_USER};

    use super::*;
    use crate::pipeline::interceptor::Outcome;
    use crate::sink::MemoryAuditSink;

    fn completion() -> Completion {
        Completion {
            outcome: Outcome::Success { status: 200 },
            elapsed: Duration::from_millis(2),
        }
    }

    fn correlated(request: RequestDescriptor) -> Exchange {
        let mut exchange = Exchange::new(request);
        let (enriched, id) = CorrelationContext::default().assign(exchange.request());
        exchange.attach_correlation(enriched, id).unwrap();
        exchange
    }

    #[test]
    fn pre_phase_is_a_no_op() {
        let sink = Arc::new(MemoryAuditSink::new());
        let summary = SummaryInterceptor::new(Arc::clone(&sink) as Arc<dyn AuditSink>);
        let mut exchange = correlated(RequestDescriptor::builder(Method::Get, "/").build());

        summary.before(&mut exchange).unwrap();
        assert!(sink.summaries().is_empty());
    }

    #[test]
    fn emits_anonymous_summary() {
        let sink = Arc::new(MemoryAuditSink::new());
        let summary = SummaryInterceptor::new(Arc::clone(&sink) as Arc<dyn AuditSink>);
        let mut exchange = correlated(RequestDescriptor::builder(Method::Delete, "/courses/4").build());

        summary.after(&mut exchange, &completion()).unwrap();

        let lines = sink.summaries();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].user, ANONYMOUS_USER);
        assert_eq!(lines[0].method, Method::Delete);
        assert_eq!(lines[0].path, "/courses/4");
        assert_eq!(Some(&lines[0].correlation_id), exchange.correlation_id());
    }

    #[test]
    fn emits_principal_when_present() {
        let sink = Arc::new(MemoryAuditSink::new());
        let summary = SummaryInterceptor::new(Arc::clone(&sink) as Arc<dyn AuditSink>);
        let request = RequestDescriptor::builder(Method::Get, "/students")
            .principal(Principal {
                id: "registrar".to_string(),
            })
            .build();
        let mut exchange = correlated(request);

        summary.after(&mut exchange, &completion()).unwrap();
        assert_eq!(sink.summaries()[0].user, "registrar");
    }
}
