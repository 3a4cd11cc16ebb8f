//! Fire-and-forget audit sink backed by a background writer.
//!
//! `emit` only enqueues; a [`BackgroundWorker`] drains the queue into a
//! delegate sink. When the queue is full the record is dropped and counted,
//! so a slow audit destination can never stall request handling.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use learnms_core::{AuditRecord, AuditSummary};
use tracing::{debug, warn};

use super::{AuditError, AuditSink};
use crate::worker::{BackgroundRunnable, BackgroundWorker, SubmitError, TaskSender};

/// How often the writer reports throughput.
const REPORT_INTERVAL: Duration = Duration::from_secs(30);

/// Unit of work queued for the writer.
#[derive(Debug)]
pub enum AuditEvent {
    Record(AuditRecord),
    Summary(AuditSummary),
}

// ---------------------------------------------------------------------------
// AuditWriter
// ---------------------------------------------------------------------------

/// Background runnable forwarding queued events to the delegate sink.
pub struct AuditWriter {
    delegate: Arc<dyn AuditSink>,
    written: u64,
}

impl AuditWriter {
    #[must_use]
    pub fn new(delegate: Arc<dyn AuditSink>) -> Self {
        Self {
            delegate,
            written: 0,
        }
    }
}

#[async_trait]
impl BackgroundRunnable for AuditWriter {
    type Task = AuditEvent;

    async fn run(&mut self, task: AuditEvent) {
        let result = match task {
            AuditEvent::Record(record) => self.delegate.emit(record),
            AuditEvent::Summary(summary) => self.delegate.emit_summary(summary),
        };
        match result {
            Ok(()) => self.written += 1,
            Err(error) => warn!(%error, "audit delegate failed, event dropped"),
        }
    }

    async fn on_tick(&mut self) {
        if self.written > 0 {
            debug!(written = self.written, "audit events written");
            self.written = 0;
        }
    }

    async fn shutdown(&mut self) {
        debug!(written = self.written, "audit writer stopped");
    }
}

// ---------------------------------------------------------------------------
// ChannelAuditSink
// ---------------------------------------------------------------------------

/// Audit sink that enqueues events for an [`AuditWriter`].
#[derive(Clone)]
pub struct ChannelAuditSink {
    tx: TaskSender<AuditEvent>,
}

impl ChannelAuditSink {
    /// Starts a writer draining into `delegate` and returns the sink feeding
    /// it together with the worker handle (stop it on shutdown to flush).
    #[must_use]
    pub fn spawn(
        delegate: Arc<dyn AuditSink>,
        capacity: usize,
    ) -> (Self, BackgroundWorker<AuditWriter>) {
        let worker = BackgroundWorker::start(AuditWriter::new(delegate), capacity, REPORT_INTERVAL);
        let sink = Self::attach(&worker);
        (sink, worker)
    }

    /// Builds a sink feeding an existing writer. Attaching to a stopped
    /// worker yields a sink whose every emit fails with
    /// [`AuditError::WriterStopped`].
    #[must_use]
    pub fn attach(worker: &BackgroundWorker<AuditWriter>) -> Self {
        let tx = worker.sender().unwrap_or_else(TaskSender::closed);
        Self { tx }
    }

    fn enqueue(&self, event: AuditEvent) -> Result<(), AuditError> {
        self.tx.try_send(event).map_err(|e| {
            metrics::counter!("gateway_audit_dropped_total").increment(1);
            match e {
                SubmitError::Full => AuditError::QueueFull,
                SubmitError::Stopped => AuditError::WriterStopped,
            }
        })
    }
}

impl fmt::Debug for ChannelAuditSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelAuditSink").finish_non_exhaustive()
    }
}

impl AuditSink for ChannelAuditSink {
    fn emit(&self, record: AuditRecord) -> Result<(), AuditError> {
        self.enqueue(AuditEvent::Record(record))
    }

    fn emit_summary(&self, summary: AuditSummary) -> Result<(), AuditError> {
        self.enqueue(AuditEvent::Summary(summary))
    }
}

#[cfg(test)]
mod tests {
    use std::time::UNIX_EPOCH;

    use learnms_core::{AuditDraft, CorrelationId, Method, RedactionPolicy, RequestDescriptor};

    use super::*;
    use crate::sink::MemoryAuditSink;

    fn record(path: &str) -> AuditRecord {
        let request = RequestDescriptor::builder(Method::Get, path).build();
        AuditDraft::capture(
            &request,
            CorrelationId::generate(),
            &RedactionPolicy::empty(),
            UNIX_EPOCH,
        )
        .complete_success(200, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn records_reach_delegate_after_stop() {
        let memory = Arc::new(MemoryAuditSink::new());
        let (sink, mut worker) =
            ChannelAuditSink::spawn(Arc::clone(&memory) as Arc<dyn AuditSink>, 64);

        for i in 0..20 {
            sink.emit(record(&format!("/students/{i}"))).unwrap();
        }
        worker.stop().await;

        let paths: Vec<_> = memory.records().into_iter().map(|r| r.path).collect();
        assert_eq!(paths.len(), 20);
        assert_eq!(paths[0], "/students/0");
        assert_eq!(paths[19], "/students/19");
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let (sink, mut worker) = ChannelAuditSink::spawn(Arc::new(MemoryAuditSink::new()), 1);

        // The writer cannot run until this test yields, so the second emit
        // already finds the queue full.
        let results: Vec<_> = (0..5).map(|_| sink.emit(record("/courses"))).collect();
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(AuditError::QueueFull))));

        worker.stop().await;
    }

    #[tokio::test]
    async fn emit_after_stop_reports_writer_stopped() {
        let (sink, mut worker) = ChannelAuditSink::spawn(Arc::new(MemoryAuditSink::new()), 4);
        worker.stop().await;

        let err = sink.emit(record("/address")).unwrap_err();
        assert!(matches!(err, AuditError::WriterStopped));

        let late = ChannelAuditSink::attach(&worker);
        assert!(matches!(
            late.emit(record("/address")),
            Err(AuditError::WriterStopped)
        ));
    }
}
