//! learnms gateway: interceptor pipeline, audit trail, and forwarding to the
//! campus services.

pub mod config;
pub mod forward;
pub mod logging;
pub mod network;
pub mod pipeline;
pub mod sink;
pub mod worker;

pub use config::{ConfigError, GatewayArgs, GatewayConfig, PipelineConfig};
pub use forward::{DownstreamResponse, ForwardError, Forwarder, HttpForwarder};
pub use pipeline::{build_gateway_pipeline, Interceptor, Pipeline};
pub use sink::{AuditError, AuditSink};
