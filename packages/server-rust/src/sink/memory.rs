//! In-memory audit sink.

use learnms_core::{AuditRecord, AuditSummary};
use parking_lot::Mutex;

use super::{AuditError, AuditSink};

/// Collects everything emitted, in emission order.
///
/// A sink built with [`MemoryAuditSink::failing`] rejects every call, which
/// lets tests exercise the pipeline's handling of sink failures.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
    summaries: Mutex<Vec<AuditSummary>>,
    reject: bool,
}

impl MemoryAuditSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failing() -> Self {
        Self {
            reject: true,
            ..Self::default()
        }
    }

    /// Snapshot of the records received so far.
    #[must_use]
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }

    /// Snapshot of the summaries received so far.
    #[must_use]
    pub fn summaries(&self) -> Vec<AuditSummary> {
        self.summaries.lock().clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn emit(&self, record: AuditRecord) -> Result<(), AuditError> {
        if self.reject {
            return Err(AuditError::Rejected(record.correlation_id.to_string()));
        }
        self.records.lock().push(record);
        Ok(())
    }

    fn emit_summary(&self, summary: AuditSummary) -> Result<(), AuditError> {
        if self.reject {
            return Err(AuditError::Rejected(summary.correlation_id.to_string()));
        }
        self.summaries.lock().push(summary);
        Ok(())
    }
}
