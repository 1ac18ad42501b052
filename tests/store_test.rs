//! Sample store contract, checked against both backends.

mod common;

use candlekeep::store::{MemoryStore, SampleStore, SqliteStore};

use common::{BASE_TS, SERIES, minute_window, sample};

async fn check_contract(store: &dyn SampleStore) {
    let window = minute_window(10);
    store.save_batch(&window).await.expect("save should succeed");
    store
        .save_batch(&[sample("ETH-USDT", "1m", BASE_TS, 5.0)])
        .await
        .expect("save should succeed");

    // Most recent three, oldest first.
    let latest = store.find(SERIES, "1m", 3).await.expect("find should succeed");
    let stamps: Vec<i64> = latest.iter().map(|s| s.timestamp).collect();
    assert_eq!(
        stamps,
        vec![BASE_TS + 7 * 60_000, BASE_TS + 8 * 60_000, BASE_TS + 9 * 60_000]
    );

    // Limit larger than what is stored.
    assert_eq!(store.find(SERIES, "1m", 100).await.unwrap().len(), 10);
    assert!(store.find(SERIES, "1H", 10).await.unwrap().is_empty());
    assert!(store.find(SERIES, "1m", 0).await.unwrap().is_empty());

    // Same key again replaces the stored value instead of failing.
    let replacement = sample(SERIES, "1m", BASE_TS + 9 * 60_000, 999.0);
    store
        .save_batch(&[replacement.clone(), replacement.clone()])
        .await
        .expect("duplicate keys must not fail the batch");
    let latest = store.find(SERIES, "1m", 1).await.unwrap();
    assert_eq!(latest, vec![replacement]);
    assert_eq!(store.find(SERIES, "1m", 100).await.unwrap().len(), 10);
}

#[tokio::test]
async fn test_sqlite_store_contract() {
    let store = SqliteStore::open_in_memory().expect("Failed to open in-memory store");
    check_contract(&store).await;
}

#[tokio::test]
async fn test_memory_store_contract() {
    let store = MemoryStore::new();
    check_contract(&store).await;
}

#[tokio::test]
async fn test_sqlite_store_persists_across_reopen() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("candles.db");

    {
        let store = SqliteStore::open(&path).expect("Failed to open store");
        store.save_batch(&minute_window(5)).await.unwrap();
    }

    let reopened = SqliteStore::open(&path).expect("Failed to reopen store");
    let samples = reopened.find(SERIES, "1m", 5).await.unwrap();
    assert_eq!(samples, minute_window(5));
}
