//! HTTP handler definitions for the gateway.
//!
//! This module defines `AppState` (the shared state carried through axum
//! extractors) and re-exports all handler functions for convenient access
//! when building the router.

pub mod gateway;
pub mod health;

pub use gateway::gateway_handler;
pub use health::{health_handler, liveness_handler, readiness_handler};

use std::sync::Arc;
use std::time::Instant;

use super::{NetworkConfig, ShutdownController};
use crate::forward::Forwarder;
use crate::pipeline::Pipeline;

/// Shared application state passed to all axum handlers via `State` extraction.
///
/// Holds `Arc` references to shared resources so cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    /// Interceptor chain every proxied request runs through.
    pub pipeline: Arc<Pipeline>,
    /// Terminal forward to the downstream services.
    pub forwarder: Arc<dyn Forwarder>,
    /// Health state and drain tracking.
    pub shutdown: Arc<ShutdownController>,
    /// Header carrying the principal set by the authentication proxy.
    pub identity_header: Arc<str>,
    pub config: Arc<NetworkConfig>,
    /// Process start time, used for uptime calculation.
    pub start_time: Instant,
}
