//! Integrity-checked reads of the sample store.
//!
//! [`IntegrityGate::read`] runs cache lookup, store query, completeness and
//! continuity checks, and (in strict mode) backfill from the authoritative
//! REST source. A read never fails; backend errors degrade to a miss or an
//! empty result.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cache::{self, ResultCache};
use crate::config::IntegrityConfig;
use crate::metrics::MetricsSink;
use crate::models::{Sample, expected_gap_secs};
use crate::rest::CandleSource;
use crate::store::SampleStore;

/// Fraction of `limit` a window must reach to count as complete.
pub const COMPLETENESS_RATIO: f64 = 0.9;

/// Allowed deviation from the expected gap, in seconds.
pub const GAP_TOLERANCE_SECS: i64 = 10;

/// Largest fraction of anomalous gaps a continuous window may contain.
pub const MAX_ANOMALY_RATIO: f64 = 0.05;

/// Returns `true` if `count` samples satisfy a request for `limit`.
///
/// An empty window is never complete.
#[must_use]
pub fn is_complete(count: usize, limit: usize) -> bool {
    count > 0 && count >= (limit as f64 * COMPLETENESS_RATIO) as usize
}

/// Returns `true` if consecutive samples are spaced as `interval` expects.
///
/// Windows with fewer than two samples and intervals without a known gap
/// are treated as continuous.
#[must_use]
pub fn is_continuous(samples: &[Sample], interval: &str) -> bool {
    if samples.len() < 2 {
        return true;
    }
    let Some(expected) = expected_gap_secs(interval) else {
        return true;
    };

    let pairs = samples.len() - 1;
    let anomalies = samples
        .windows(2)
        .filter(|w| {
            let gap = (w[1].timestamp - w[0].timestamp).div_euclid(1000);
            (gap - expected).abs() > GAP_TOLERANCE_SECS
        })
        .count();

    let ratio = anomalies as f64 / pairs as f64;
    if anomalies > 0 {
        debug!(interval, anomalies, pairs, ratio, "Gap anomalies");
    }
    ratio <= MAX_ANOMALY_RATIO
}

/// Validating read path in front of the sample store.
pub struct IntegrityGate {
    store: Arc<dyn SampleStore>,
    cache: Arc<dyn ResultCache>,
    source: Arc<dyn CandleSource>,
    metrics: Arc<dyn MetricsSink>,
    config: IntegrityConfig,
}

impl IntegrityGate {
    #[must_use]
    pub fn new(
        store: Arc<dyn SampleStore>,
        cache: Arc<dyn ResultCache>,
        source: Arc<dyn CandleSource>,
        metrics: Arc<dyn MetricsSink>,
        config: IntegrityConfig,
    ) -> Self {
        Self {
            store,
            cache,
            source,
            metrics,
            config,
        }
    }

    /// Returns up to `limit` of the most recent samples, oldest first.
    ///
    /// Validated windows are cached when a TTL is configured. A failing
    /// window is returned as-is unless strict mode is on, in which case it
    /// is replaced by a fresh fetch from the authoritative source (or by an
    /// empty result when that fetch yields nothing).
    pub async fn read(&self, series: &str, interval: &str, limit: usize) -> Vec<Sample> {
        if !self.config.enabled {
            return self.query_store(series, interval, limit).await;
        }

        let key = cache::integrity_key(series, interval, limit);
        let cached: Option<Vec<Sample>> = cache::get_json(self.cache.as_ref(), &key).await;
        match cached {
            Some(samples) if !samples.is_empty() => {
                self.metrics.cache_access(true);
                debug!(key, count = samples.len(), "Integrity cache hit");
                return samples;
            }
            _ => self.metrics.cache_access(false),
        }

        let samples = self.query_store(series, interval, limit).await;
        let complete = is_complete(samples.len(), limit);
        let continuous = is_continuous(&samples, interval);

        if complete && continuous {
            self.populate(&key, &samples).await;
            return samples;
        }

        warn!(
            series,
            interval,
            limit,
            count = samples.len(),
            complete,
            continuous,
            strict = self.config.strict,
            "Integrity check failed"
        );

        if !self.config.strict {
            return samples;
        }

        self.backfill(series, interval, limit, &key).await
    }

    async fn query_store(&self, series: &str, interval: &str, limit: usize) -> Vec<Sample> {
        match self.store.find(series, interval, limit).await {
            Ok(samples) => samples,
            Err(e) => {
                warn!(series, interval, "Store query failed: {e}");
                Vec::new()
            }
        }
    }

    async fn backfill(&self, series: &str, interval: &str, limit: usize, key: &str) -> Vec<Sample> {
        let fetch = limit.min(self.config.fetch_limit);
        let samples = match self.source.fetch_candles(series, interval, fetch).await {
            Ok(samples) => samples,
            Err(e) => {
                warn!(series, interval, "Backfill fetch failed: {e}");
                return Vec::new();
            }
        };

        if samples.is_empty() {
            warn!(series, interval, "Backfill returned no samples");
            return samples;
        }

        if let Err(e) = self.store.save_batch(&samples).await {
            warn!(series, interval, count = samples.len(), "Failed to persist backfill: {e}");
        }
        self.populate(key, &samples).await;
        info!(series, interval, count = samples.len(), "Backfilled window");

        samples
    }

    async fn populate(&self, key: &str, samples: &[Sample]) {
        if self.config.cache_ttl_secs == 0 || samples.is_empty() {
            return;
        }
        cache::set_json(self.cache.as_ref(), key, &samples, self.config.cache_ttl_secs).await;
    }
}
