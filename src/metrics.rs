use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing pipeline activity across all sessions.
#[derive(Default)]
pub struct PipelineMetrics {
    documents_processed: AtomicU64,
    chunks_indexed: AtomicU64,
    questions_answered: AtomicU64,
    question_failures: AtomicU64,
    upload_failures: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful upload of `documents` files producing `chunk_count` chunks.
    pub fn record_upload(&self, documents: u64, chunk_count: u64) {
        self.documents_processed
            .fetch_add(documents, Ordering::Relaxed);
        self.chunks_indexed.fetch_add(chunk_count, Ordering::Relaxed);
    }

    /// Record an upload that left the session without a knowledge base.
    pub fn record_upload_failure(&self) {
        self.upload_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an answered question.
    pub fn record_answer(&self) {
        self.questions_answered.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a question that could not be answered.
    pub fn record_question_failure(&self) {
        self.question_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_processed: self.documents_processed.load(Ordering::Relaxed),
            chunks_indexed: self.chunks_indexed.load(Ordering::Relaxed),
            questions_answered: self.questions_answered.load(Ordering::Relaxed),
            question_failures: self.question_failures.load(Ordering::Relaxed),
            upload_failures: self.upload_failures.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of pipeline counters used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Documents successfully processed since startup.
    pub documents_processed: u64,
    /// Chunks embedded into knowledge bases since startup.
    pub chunks_indexed: u64,
    /// Questions answered since startup.
    pub questions_answered: u64,
    /// Questions that ended in an error.
    pub question_failures: u64,
    /// Uploads that ended in an error.
    pub upload_failures: u64,
}
