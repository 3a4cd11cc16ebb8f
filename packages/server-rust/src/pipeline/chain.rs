//! The gateway's canonical interceptor chain.

use std::sync::Arc;

use learnms_core::CorrelationContext;

use super::audit::AuditInterceptor;
use super::correlation::CorrelationInterceptor;
use super::orchestrator::Pipeline;
use super::summary::SummaryInterceptor;
use crate::config::PipelineConfig;
use crate::sink::AuditSink;

/// Assembles the chain: correlation, audit, summary.
#[must_use]
pub fn build_gateway_pipeline(config: &PipelineConfig, sink: Arc<dyn AuditSink>) -> Pipeline {
    let correlation = CorrelationContext::new(config.correlation_header.clone());

    let mut audit = AuditInterceptor::new(Arc::clone(&config.redaction), Arc::clone(&sink));
    if let Some(pattern) = &config.quiet_paths {
        audit = audit.with_quiet_paths(pattern.clone());
    }

    Pipeline::builder()
        .correlation(correlation.clone())
        .interceptor(CorrelationInterceptor::new(correlation))
        .interceptor(audit)
        .interceptor(SummaryInterceptor::new(sink))
        .build()
}
