//! Stamps every request with a correlation id before anything else runs.

use learnms_core::CorrelationContext;

use super::interceptor::{priority, Exchange, Interceptor, InterceptorError};

/// Pre-phase assigns the correlation id; post-phase does nothing.
#[derive(Debug, Clone, Default)]
pub struct CorrelationInterceptor {
    context: CorrelationContext,
}

impl CorrelationInterceptor {
    #[must_use]
    pub fn new(context: CorrelationContext) -> Self {
        Self { context }
    }
}

impl Interceptor for CorrelationInterceptor {
    fn name(&self) -> &'static str {
        "correlation"
    }

    fn priority(&self) -> i32 {
        priority::CORRELATION
    }

    fn before(&self, exchange: &mut Exchange) -> Result<(), InterceptorError> {
        let (enriched, id) = self.context.assign(exchange.request());
        exchange.attach_correlation(enriched, id)
    }
}
