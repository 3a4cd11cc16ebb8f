//! Audit sinks: where finalized audit records and summary lines go.
//!
//! - [`TracingAuditSink`]: structured `tracing` events (the default)
//! - [`ChannelAuditSink`]: fire-and-forget hand-off to a background writer
//! - [`MemoryAuditSink`]: in-memory collector for tests and diagnostics
//!
//! Sinks never block the request path. Errors are returned to the pipeline,
//! which logs them and drops the record.

pub mod channel;
pub mod memory;
pub mod tracing_sink;

pub use channel::{AuditEvent, AuditWriter, ChannelAuditSink};
pub use memory::MemoryAuditSink;
pub use tracing_sink::{TracingAuditSink, ACCESS_TARGET, AUDIT_TARGET};

use learnms_core::{AuditRecord, AuditSummary};

/// Errors raised while emitting audit output.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit queue full, record dropped")]
    QueueFull,
    #[error("audit writer stopped, record dropped")]
    WriterStopped,
    #[error("failed to encode audit record: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("audit sink rejected record: {0}")]
    Rejected(String),
}

/// Destination for audit output.
///
/// Implementations must return quickly; anything slow belongs behind a
/// [`ChannelAuditSink`].
pub trait AuditSink: Send + Sync {
    /// Emits one finalized audit record.
    ///
    /// # Errors
    ///
    /// Returns an [`AuditError`] if the record could not be accepted.
    fn emit(&self, record: AuditRecord) -> Result<(), AuditError>;

    /// Emits one coarse summary line.
    ///
    /// # Errors
    ///
    /// Returns an [`AuditError`] if the summary could not be accepted.
    fn emit_summary(&self, summary: AuditSummary) -> Result<(), AuditError>;
}
