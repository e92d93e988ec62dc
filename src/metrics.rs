use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing pipeline activity.
#[derive(Default)]
pub struct PipelineMetrics {
    documents_completed: AtomicU64,
    documents_failed: AtomicU64,
    chunks_embedded: AtomicU64,
    chunks_degraded: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a document that reached `completed`, with its embedded/degraded chunk split.
    pub fn record_completed(&self, embedded: u64, degraded: u64) {
        self.documents_completed.fetch_add(1, Ordering::Relaxed);
        self.chunks_embedded.fetch_add(embedded, Ordering::Relaxed);
        self.chunks_degraded.fetch_add(degraded, Ordering::Relaxed);
    }

    /// Record a document that reached `failed`.
    pub fn record_failed(&self) {
        self.documents_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_completed: self.documents_completed.load(Ordering::Relaxed),
            documents_failed: self.documents_failed.load(Ordering::Relaxed),
            chunks_embedded: self.chunks_embedded.load(Ordering::Relaxed),
            chunks_degraded: self.chunks_degraded.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of pipeline counters used for reporting.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Number of documents that reached `completed` since startup.
    pub documents_completed: u64,
    /// Number of documents that reached `failed` since startup.
    pub documents_failed: u64,
    /// Total chunks persisted with a real embedding vector.
    pub chunks_embedded: u64,
    /// Total chunks persisted on the degraded placeholder path.
    pub chunks_degraded: u64,
}
