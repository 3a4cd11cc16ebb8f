//! Audit records produced once per gateway request.
//!
//! An [`AuditDraft`] is opened when the request enters the pipeline and can
//! only be closed through [`AuditDraft::complete_success`] or
//! [`AuditDraft::complete_error`], so every [`AuditRecord`] carries exactly
//! one terminal status.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::correlation::CorrelationId;
use crate::redaction::RedactionPolicy;
use crate::request::{Method, RequestDescriptor};

/// User shown in summaries when no principal is attached.
pub const ANONYMOUS_USER: &str = "anonymous";

/// Milliseconds since the unix epoch, saturating on clock anomalies.
#[must_use]
pub fn unix_millis(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Terminal status of an audited request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditStatus {
    Success,
    Error,
}

impl AuditStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Error => "ERROR",
        }
    }
}

/// Request-scoped audit data captured before forwarding.
#[derive(Debug, Clone)]
pub struct AuditDraft {
    correlation_id: CorrelationId,
    method: Method,
    path: String,
    headers: BTreeMap<String, String>,
    query: BTreeMap<String, String>,
    remote_address: Option<String>,
    started_at_ms: u64,
}

impl AuditDraft {
    /// Snapshots `request` with headers and query redacted by `policy`.
    #[must_use]
    pub fn capture(
        request: &RequestDescriptor,
        correlation_id: CorrelationId,
        policy: &RedactionPolicy,
        started_at: SystemTime,
    ) -> Self {
        Self {
            correlation_id,
            method: request.method().clone(),
            path: request.path().to_string(),
            headers: policy.redact(request.headers()),
            query: policy.redact(request.query()),
            remote_address: request.remote_addr().map(str::to_string),
            started_at_ms: unix_millis(started_at),
        }
    }

    #[must_use]
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Closes the draft for a request the downstream answered.
    #[must_use]
    pub fn complete_success(self, status_code: u16, elapsed: Duration) -> AuditRecord {
        self.finish(elapsed, AuditStatus::Success, None, Some(status_code))
    }

    /// Closes the draft for a request that failed or was cancelled.
    #[must_use]
    pub fn complete_error(self, message: impl Into<String>, elapsed: Duration) -> AuditRecord {
        self.finish(elapsed, AuditStatus::Error, Some(message.into()), None)
    }

    fn finish(
        self,
        elapsed: Duration,
        status: AuditStatus,
        status_message: Option<String>,
        status_code: Option<u16>,
    ) -> AuditRecord {
        AuditRecord {
            correlation_id: self.correlation_id,
            method: self.method,
            path: self.path,
            headers: self.headers,
            query: self.query,
            remote_address: self.remote_address,
            started_at_ms: self.started_at_ms,
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            status,
            status_message,
            status_code,
        }
    }
}

/// Finalized audit entry handed to an audit sink.
///
/// Field names in the serialized form follow the gateway's historical
/// `REQUEST: {...}` log layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    #[serde(rename = "CORRELATION-ID")]
    pub correlation_id: CorrelationId,
    #[serde(rename = "METHOD")]
    pub method: Method,
    #[serde(rename = "PATH")]
    pub path: String,
    #[serde(rename = "HEADER")]
    pub headers: BTreeMap<String, String>,
    #[serde(rename = "PARAM")]
    pub query: BTreeMap<String, String>,
    #[serde(rename = "REMOTE-ADDRESS", skip_serializing_if = "Option::is_none", default)]
    pub remote_address: Option<String>,
    #[serde(rename = "START")]
    pub started_at_ms: u64,
    #[serde(rename = "DURATION")]
    pub duration_ms: u64,
    #[serde(rename = "STATUS")]
    pub status: AuditStatus,
    #[serde(rename = "STATUS-MESSAGE", skip_serializing_if = "Option::is_none", default)]
    pub status_message: Option<String>,
    #[serde(rename = "STATUS-CODE", skip_serializing_if = "Option::is_none", default)]
    pub status_code: Option<u16>,
}

impl AuditRecord {
    /// Wall-clock completion time in unix millis.
    #[must_use]
    pub fn completed_at_ms(&self) -> u64 {
        self.started_at_ms.saturating_add(self.duration_ms)
    }
}

/// Coarse one-line trace of a request, independent of the detailed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSummary {
    pub user: String,
    pub method: Method,
    pub path: String,
    pub correlation_id: CorrelationId,
    pub timestamp_ms: u64,
}

impl AuditSummary {
    #[must_use]
    pub fn for_request(
        request: &RequestDescriptor,
        correlation_id: CorrelationId,
        at: SystemTime,
    ) -> Self {
        Self {
            user: request
                .principal()
                .map_or_else(|| ANONYMOUS_USER.to_string(), |p| p.id.clone()),
            method: request.method().clone(),
            path: request.path().to_string(),
            correlation_id,
            timestamp_ms: unix_millis(at),
        }
    }
}
