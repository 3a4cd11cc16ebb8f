//! Per-request correlation identifiers.
//!
//! Every request leaving the gateway carries exactly one correlation header.
//! An inbound value is reused verbatim so traces stay joined across
//! services; otherwise a fresh UUID v4 is minted.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::request::RequestDescriptor;

/// Header carrying the correlation id when none is configured.
pub const DEFAULT_CORRELATION_HEADER: &str = "X-Correlation-Id";

/// Opaque, non-empty per-request trace identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Mints a new random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wraps an externally supplied id. Returns `None` for blank input.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        if value.trim().is_empty() {
            None
        } else {
            Some(Self(value.to_string()))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derives or generates the correlation id for a request.
#[derive(Debug, Clone)]
pub struct CorrelationContext {
    header: String,
}

impl CorrelationContext {
    #[must_use]
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
        }
    }

    #[must_use]
    pub fn header_name(&self) -> &str {
        &self.header
    }

    /// Reads the inbound correlation id, if a usable one is present.
    ///
    /// The header name is matched ignoring ASCII case. Values that are blank
    /// or not valid UTF-8 are treated as absent.
    #[must_use]
    pub fn extract(&self, request: &RequestDescriptor) -> Option<CorrelationId> {
        request
            .headers()
            .first_ignore_case(&self.header)
            .and_then(|value| value.as_str().ok())
            .and_then(CorrelationId::parse)
    }

    /// Returns an enriched copy of `request` carrying the correlation header,
    /// together with the id it carries. `request` itself is not modified.
    #[must_use]
    pub fn assign(&self, request: &RequestDescriptor) -> (RequestDescriptor, CorrelationId) {
        let id = self.extract(request).unwrap_or_else(CorrelationId::generate);
        let enriched = request.with_header(&self.header, id.as_str());
        (enriched, id)
    }
}

impl Default for CorrelationContext {
    fn default() -> Self {
        Self::new(DEFAULT_CORRELATION_HEADER)
    }
}
