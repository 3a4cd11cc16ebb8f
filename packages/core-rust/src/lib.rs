//! learnms core: request descriptors, correlation ids, redaction policy, and
//! audit records shared by the gateway pipeline.

pub mod audit;
pub mod correlation;
pub mod redaction;
pub mod request;

pub use audit::{unix_millis, AuditDraft, AuditRecord, AuditStatus, AuditSummary, ANONYMOUS_USER};
pub use correlation::{CorrelationContext, CorrelationId, DEFAULT_CORRELATION_HEADER};
pub use redaction::{RedactionPolicy, MASK};
pub use request::{FieldValue, Method, MultiMap, Principal, RequestDescriptor, RequestDescriptorBuilder};

