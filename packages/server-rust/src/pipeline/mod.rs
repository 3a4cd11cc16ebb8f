//! Gateway request pipeline.
//!
//! - [`interceptor`]: the `Interceptor` contract, `Exchange`, `Completion`
//! - [`orchestrator`]: `Pipeline`, which runs the chain around the forward
//! - [`correlation`], [`audit`], [`summary`]: the concrete interceptors
//! - [`chain`]: the canonical chain builder

pub mod audit;
pub mod chain;
pub mod correlation;
pub mod interceptor;
pub mod orchestrator;
pub mod summary;

pub use audit::{AuditInterceptor, DEFAULT_QUIET_PATHS};
pub use chain::build_gateway_pipeline;
pub use correlation::CorrelationInterceptor;
pub use interceptor::{
    priority, Completion, Exchange, Interceptor, InterceptorError, Outcome, ResponseStatus,
    CANCELLED_MESSAGE,
};
pub use orchestrator::{Pipeline, PipelineBuilder};
pub use summary::SummaryInterceptor;
