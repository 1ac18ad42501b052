//! Ingestion and cache counters.
//!
//! Components receive an `Arc<dyn MetricsSink>` at construction time instead
//! of reaching for process-wide state, so tests can observe exactly what a
//! single component reported.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Receiver of operational counters.
pub trait MetricsSink: Send + Sync {
    /// A text frame arrived on the push channel.
    fn message_received(&self, bytes: usize);
    /// A frame that should have carried a sample could not be parsed.
    fn parse_failure(&self);
    /// Bytes written to or read from a backend.
    fn data_processed(&self, bytes: u64);
    /// The batch writer persisted `count` samples.
    fn samples_flushed(&self, count: usize);
    /// The integrity gate looked up the result cache.
    fn cache_access(&self, hit: bool);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn message_received(&self, _bytes: usize) {}
    fn parse_failure(&self) {}
    fn data_processed(&self, _bytes: u64) {}
    fn samples_flushed(&self, _count: usize) {}
    fn cache_access(&self, _hit: bool) {}
}

/// Lock-free counters backing [`MetricsSink`].
#[derive(Debug, Default)]
pub struct IngestMetrics {
    messages: AtomicU64,
    message_bytes: AtomicU64,
    parse_failures: AtomicU64,
    data_processed: AtomicU64,
    samples_flushed: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

/// Point-in-time copy of [`IngestMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub messages: u64,
    pub message_bytes: u64,
    pub parse_failures: u64,
    pub data_processed: u64,
    pub samples_flushed: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Hits over total lookups, `0.0` before the first lookup.
    pub cache_hit_rate: f64,
}

impl IngestMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let cache_hits = self.cache_hits.load(Ordering::Relaxed);
        let cache_misses = self.cache_misses.load(Ordering::Relaxed);
        let lookups = cache_hits + cache_misses;

        MetricsSnapshot {
            messages: self.messages.load(Ordering::Relaxed),
            message_bytes: self.message_bytes.load(Ordering::Relaxed),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            data_processed: self.data_processed.load(Ordering::Relaxed),
            samples_flushed: self.samples_flushed.load(Ordering::Relaxed),
            cache_hits,
            cache_misses,
            cache_hit_rate: if lookups == 0 {
                0.0
            } else {
                cache_hits as f64 / lookups as f64
            },
        }
    }
}

impl MetricsSink for IngestMetrics {
    fn message_received(&self, bytes: usize) {
        self.messages.fetch_add(1, Ordering::Relaxed);
        self.message_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn parse_failure(&self) {
        self.parse_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn data_processed(&self, bytes: u64) {
        self.data_processed.fetch_add(bytes, Ordering::Relaxed);
    }

    fn samples_flushed(&self, count: usize) {
        self.samples_flushed
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    fn cache_access(&self, hit: bool) {
        if hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
        }
    }
}
