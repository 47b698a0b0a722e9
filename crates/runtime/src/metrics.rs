//! Per-pipeline counters.
//!
//! Per-record failures never stop the stream; they only show up here.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Counters shared by all stages of one pipeline.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    pub records_in: AtomicU64,
    pub decode_errors: AtomicU64,
    pub extraction_errors: AtomicU64,
    pub filtered: AtomicU64,
    pub joined: AtomicU64,
    pub emitted: AtomicU64,
    pub serialization_errors: AtomicU64,
    pub evicted: AtomicU64,
}

/// Point-in-time copy of [`PipelineMetrics`].
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub records_in: u64,
    pub decode_errors: u64,
    pub extraction_errors: u64,
    pub filtered: u64,
    pub joined: u64,
    pub emitted: u64,
    pub serialization_errors: u64,
    pub evicted: u64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            records_in: self.records_in.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            extraction_errors: self.extraction_errors.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            joined: self.joined.load(Ordering::Relaxed),
            emitted: self.emitted.load(Ordering::Relaxed),
            serialization_errors: self.serialization_errors.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
        }
    }

    /// Emit the current counters as one structured log line.
    pub fn log(&self, context: &str) {
        let s = self.snapshot();
        info!(
            context,
            records_in = s.records_in,
            decode_errors = s.decode_errors,
            extraction_errors = s.extraction_errors,
            filtered = s.filtered,
            joined = s.joined,
            emitted = s.emitted,
            serialization_errors = s.serialization_errors,
            evicted = s.evicted,
            "pipeline counters"
        );
    }
}
