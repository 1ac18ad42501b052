//! Integrity gate: cache, completeness, continuity and strict backfill.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use candlekeep::cache::{self, CacheTtl, DisabledCache, MemoryCache, ResultCache};
use candlekeep::config::IntegrityConfig;
use candlekeep::integrity::IntegrityGate;
use candlekeep::metrics::{IngestMetrics, MetricsSink};
use candlekeep::models::Sample;
use candlekeep::rest::CandleSource;

use common::{BASE_TS, MockSource, RecordingStore, SERIES, minute_window, sample};

struct Harness {
    store: Arc<RecordingStore>,
    cache: Arc<MemoryCache>,
    source: Arc<MockSource>,
    metrics: Arc<IngestMetrics>,
    gate: IntegrityGate,
}

fn harness(store: RecordingStore, source: MockSource, config: IntegrityConfig) -> Harness {
    let store = Arc::new(store);
    let cache = Arc::new(MemoryCache::new());
    let source = Arc::new(source);
    let metrics = Arc::new(IngestMetrics::new());

    let store_dyn: Arc<dyn candlekeep::store::SampleStore> = store.clone();
    let cache_dyn: Arc<dyn ResultCache> = cache.clone();
    let source_dyn: Arc<dyn CandleSource> = source.clone();
    let metrics_dyn: Arc<dyn MetricsSink> = metrics.clone();
    let gate = IntegrityGate::new(store_dyn, cache_dyn, source_dyn, metrics_dyn, config);

    Harness {
        store,
        cache,
        source,
        metrics,
        gate,
    }
}

fn config(strict: bool, ttl: u64) -> IntegrityConfig {
    IntegrityConfig {
        enabled: true,
        strict,
        fetch_limit: 300,
        cache_ttl_secs: ttl,
    }
}

/// `count` one-minute samples where the gap ending at each listed position
/// is 75s instead of 60s.
fn window_with_jitter(count: usize, shifted: &[usize]) -> Vec<Sample> {
    minute_window(count)
        .into_iter()
        .enumerate()
        .map(|(i, mut s)| {
            let offset = shifted.iter().filter(|&&p| p <= i).count() as i64 * 15_000;
            s.timestamp += offset;
            s
        })
        .collect()
}

#[tokio::test]
async fn test_cache_hit_skips_store() {
    let h = harness(RecordingStore::new(), MockSource::returning(vec![]), config(false, 60));
    let key = cache::integrity_key(SERIES, "1m", 100);
    cache::set_json(h.cache.as_ref(), &key, &minute_window(50), 60).await;

    let result = h.gate.read(SERIES, "1m", 100).await;

    assert_eq!(result.len(), 50);
    assert_eq!(h.store.finds.load(Ordering::SeqCst), 0);
    assert_eq!(h.metrics.snapshot().cache_hits, 1);
}

#[tokio::test]
async fn test_complete_window_is_cached() {
    let h = harness(
        RecordingStore::with_find(minute_window(100)),
        MockSource::returning(vec![]),
        config(false, 60),
    );

    assert_eq!(h.gate.read(SERIES, "1m", 100).await.len(), 100);
    let key = cache::integrity_key(SERIES, "1m", 100);
    assert!(matches!(h.cache.ttl(&key).await, CacheTtl::Expires(_)));

    // Served from cache the second time.
    assert_eq!(h.gate.read(SERIES, "1m", 100).await.len(), 100);
    assert_eq!(h.store.finds.load(Ordering::SeqCst), 1);
    let snap = h.metrics.snapshot();
    assert_eq!((snap.cache_hits, snap.cache_misses), (1, 1));
}

#[tokio::test]
async fn test_zero_ttl_disables_caching() {
    let h = harness(
        RecordingStore::with_find(minute_window(100)),
        MockSource::returning(vec![]),
        config(false, 0),
    );

    h.gate.read(SERIES, "1m", 100).await;
    h.gate.read(SERIES, "1m", 100).await;

    assert_eq!(h.store.finds.load(Ordering::SeqCst), 2);
    assert!(!h.cache.exists(&cache::integrity_key(SERIES, "1m", 100)).await);
}

#[tokio::test]
async fn test_completeness_boundary() {
    let h = harness(
        RecordingStore::with_find(minute_window(90)),
        MockSource::returning(minute_window(100)),
        config(true, 0),
    );
    assert_eq!(h.gate.read(SERIES, "1m", 100).await.len(), 90);
    assert!(h.source.calls().is_empty());

    let h = harness(
        RecordingStore::with_find(minute_window(89)),
        MockSource::returning(minute_window(100)),
        config(true, 0),
    );
    assert_eq!(h.gate.read(SERIES, "1m", 100).await.len(), 100);
    assert_eq!(h.source.calls().len(), 1);
}

#[tokio::test]
async fn test_continuity_tolerance() {
    // 21 samples give 20 consecutive pairs.
    let one_gap = window_with_jitter(21, &[10]);
    let h = harness(
        RecordingStore::with_find(one_gap),
        MockSource::returning(minute_window(21)),
        config(true, 0),
    );
    h.gate.read(SERIES, "1m", 21).await;
    assert!(h.source.calls().is_empty(), "1/20 anomalous gaps should pass");

    let two_gaps = window_with_jitter(21, &[5, 15]);
    let h = harness(
        RecordingStore::with_find(two_gaps),
        MockSource::returning(minute_window(21)),
        config(true, 0),
    );
    h.gate.read(SERIES, "1m", 21).await;
    assert_eq!(h.source.calls().len(), 1, "2/20 anomalous gaps should fail");
}

#[tokio::test]
async fn test_non_strict_failure_returns_data_uncached() {
    let h = harness(
        RecordingStore::with_find(minute_window(40)),
        MockSource::returning(minute_window(100)),
        config(false, 60),
    );

    let result = h.gate.read(SERIES, "1m", 100).await;

    assert_eq!(result, minute_window(40));
    assert!(h.source.calls().is_empty());
    assert!(!h.cache.exists(&cache::integrity_key(SERIES, "1m", 100)).await);
}

#[tokio::test]
async fn test_strict_backfill_replaces_incomplete_window() {
    let backfill: Vec<Sample> = (0..100)
        .map(|i| sample(SERIES, "1m", BASE_TS + i * 60_000, 500.0))
        .collect();
    let h = harness(
        RecordingStore::with_find(minute_window(40)),
        MockSource::returning(backfill.clone()),
        config(true, 60),
    );

    let result = h.gate.read(SERIES, "1m", 100).await;

    assert_eq!(result, backfill);
    assert_eq!(h.source.calls(), vec![(SERIES.to_string(), "1m".to_string(), 100)]);
    assert_eq!(h.store.save_calls(), vec![backfill.clone()]);

    let cached: Option<Vec<Sample>> =
        cache::get_json(h.cache.as_ref(), &cache::integrity_key(SERIES, "1m", 100)).await;
    assert_eq!(cached, Some(backfill));
}

#[tokio::test]
async fn test_backfill_respects_fetch_limit() {
    let mut cfg = config(true, 0);
    cfg.fetch_limit = 50;
    let h = harness(
        RecordingStore::with_find(vec![]),
        MockSource::returning(minute_window(50)),
        cfg,
    );

    assert_eq!(h.gate.read(SERIES, "1m", 200).await.len(), 50);
    assert_eq!(h.source.calls()[0].2, 50);
}

#[tokio::test]
async fn test_empty_or_failed_backfill_returns_nothing() {
    let h = harness(
        RecordingStore::with_find(minute_window(10)),
        MockSource::returning(vec![]),
        config(true, 60),
    );
    assert!(h.gate.read(SERIES, "1m", 100).await.is_empty());
    assert!(h.store.save_calls().is_empty());

    let h = harness(
        RecordingStore::with_find(minute_window(10)),
        MockSource::failing(),
        config(true, 60),
    );
    assert!(h.gate.read(SERIES, "1m", 100).await.is_empty());
}

#[tokio::test]
async fn test_store_failure_degrades_to_empty_read() {
    let store = RecordingStore::new();
    store.fail_finds.store(true, Ordering::SeqCst);
    let h = harness(store, MockSource::returning(vec![]), config(false, 0));

    assert!(h.gate.read(SERIES, "1m", 100).await.is_empty());
}

#[tokio::test]
async fn test_backfill_persist_failure_still_returns_data() {
    let store = RecordingStore::with_find(vec![]);
    store.fail_saves.store(true, Ordering::SeqCst);
    let h = harness(store, MockSource::returning(minute_window(30)), config(true, 0));

    assert_eq!(h.gate.read(SERIES, "1m", 30).await.len(), 30);
}

#[tokio::test]
async fn test_disabled_gate_passes_through() {
    let mut cfg = config(true, 60);
    cfg.enabled = false;
    let h = harness(
        RecordingStore::with_find(minute_window(3)),
        MockSource::returning(minute_window(100)),
        cfg,
    );

    assert_eq!(h.gate.read(SERIES, "1m", 100).await.len(), 3);
    assert!(h.source.calls().is_empty());
    let snap = h.metrics.snapshot();
    assert_eq!(snap.cache_hits + snap.cache_misses, 0);
}

#[tokio::test]
async fn test_disabled_cache_never_blocks_reads() {
    let store: Arc<dyn candlekeep::store::SampleStore> =
        Arc::new(RecordingStore::with_find(minute_window(100)));
    let gate = IntegrityGate::new(
        store,
        Arc::new(DisabledCache),
        Arc::new(MockSource::returning(vec![])),
        Arc::new(IngestMetrics::new()),
        config(false, 60),
    );

    assert_eq!(gate.read(SERIES, "1m", 100).await.len(), 100);
    assert_eq!(gate.read(SERIES, "1m", 100).await.len(), 100);
}
