//! Deduplicating batch writer between the push channel and the store.
//!
//! The push channel re-sends the still-forming candle on every trade, so the
//! buffer keeps only the latest sample per `(series, interval, timestamp)`
//! and drains it into the [`SampleStore`] on a fixed period.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::metrics::MetricsSink;
use crate::models::{Sample, SampleKey};
use crate::shutdown;
use crate::store::SampleStore;

/// Approximate persisted size of one sample, reported as processed data.
pub const BYTES_PER_SAMPLE: u64 = 200;

#[derive(Debug, Clone)]
struct Buffered {
    /// Write sequence; a flush only clears entries it actually persisted.
    seq: u64,
    sample: Sample,
}

/// In-memory dedup buffer with single-flight flushes.
pub struct BatchWriter {
    store: Arc<dyn SampleStore>,
    metrics: Arc<dyn MetricsSink>,
    buffer: Mutex<HashMap<SampleKey, Buffered>>,
    next_seq: AtomicU64,
    flush_lock: tokio::sync::Mutex<()>,
}

impl BatchWriter {
    #[must_use]
    pub fn new(store: Arc<dyn SampleStore>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            store,
            metrics,
            buffer: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            flush_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Buffers `sample`, replacing any earlier sample with the same key.
    pub fn add(&self, sample: Sample) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.buffer().insert(sample.key(), Buffered { seq, sample });
    }

    /// Number of buffered samples.
    pub fn size(&self) -> usize {
        self.buffer().len()
    }

    /// Writes everything buffered so far to the store.
    ///
    /// On success only the entries that were written are cleared; samples
    /// added or replaced during the write stay for the next flush. On failure
    /// the buffer is left as it was. Returns the number of samples written.
    pub async fn flush(&self) -> usize {
        let _single_flight = self.flush_lock.lock().await;

        let snapshot: Vec<(SampleKey, u64, Sample)> = self
            .buffer()
            .iter()
            .map(|(key, entry)| (key.clone(), entry.seq, entry.sample.clone()))
            .collect();
        if snapshot.is_empty() {
            return 0;
        }

        let samples: Vec<Sample> = snapshot.iter().map(|(_, _, s)| s.clone()).collect();
        if let Err(e) = self.store.save_batch(&samples).await {
            error!(count = samples.len(), "Batch write failed, keeping buffer: {e}");
            return 0;
        }

        {
            let mut buffer = self.buffer();
            for (key, seq, _) in &snapshot {
                if buffer.get(key).is_some_and(|entry| entry.seq == *seq) {
                    buffer.remove(key);
                }
            }
        }

        let count = samples.len();
        self.metrics.samples_flushed(count);
        self.metrics
            .data_processed(count as u64 * BYTES_PER_SAMPLE);
        debug!(count, remaining = self.size(), "Flushed samples");

        count
    }

    /// Spawns the periodic flush task.
    ///
    /// The task stops on shutdown without a final flush; the owner performs
    /// that once every timer has stopped.
    pub fn spawn_flush_task(
        self: &Arc<Self>,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let writer = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        writer.flush().await;
                    }
                    () = shutdown::requested(&mut shutdown) => {
                        info!("Flush task stopping");
                        break;
                    }
                }
            }
        })
    }

    fn buffer(&self) -> std::sync::MutexGuard<'_, HashMap<SampleKey, Buffered>> {
        self.buffer.lock().unwrap_or_else(|e| e.into_inner())
    }
}
