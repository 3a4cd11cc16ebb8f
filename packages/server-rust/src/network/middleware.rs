//! Transport-level HTTP middleware for the gateway.
//!
//! Only concerns that must not short-circuit a request live here. Body
//! limits, correlation and audit belong to the interceptor pipeline, so every
//! proxied request (preflights and oversized uploads included) is correlated
//! and audited.

use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

/// The Tower layer produced by [`build_http_layers`].
pub type HttpLayers = TraceLayer<
    SharedClassifier<ServerErrorsAsFailures>,
    DefaultMakeSpan,
    DefaultOnRequest,
    DefaultOnResponse,
>;

/// Builds the HTTP-level Tower middleware: a debug-level span per exchange.
#[must_use]
pub fn build_http_layers() -> HttpLayers {
    TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::DEBUG))
}
