//! Audit sink writing structured `tracing` events.

use learnms_core::{AuditRecord, AuditSummary};
use tracing::info;

use super::{AuditError, AuditSink};

/// `tracing` target for detailed audit records.
pub const AUDIT_TARGET: &str = "learnms::audit";

/// `tracing` target for coarse summary lines.
pub const ACCESS_TARGET: &str = "learnms::access";

/// Writes each record as one `info` event carrying the record's JSON form.
///
/// Route the targets above to a dedicated layer (file, collector) through the
/// subscriber configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, record: AuditRecord) -> Result<(), AuditError> {
        let line = serde_json::to_string(&record)?;
        info!(
            target: AUDIT_TARGET,
            correlation_id = %record.correlation_id,
            status = record.status.as_str(),
            duration_ms = record.duration_ms,
            "REQUEST: {line}"
        );
        Ok(())
    }

    fn emit_summary(&self, summary: AuditSummary) -> Result<(), AuditError> {
        info!(
            target: ACCESS_TARGET,
            user = %summary.user,
            method = %summary.method,
            path = %summary.path,
            correlation_id = %summary.correlation_id,
            timestamp_ms = summary.timestamp_ms,
            "request summary"
        );
        Ok(())
    }
}
