//! Result cache with per-entry TTL.
//!
//! Backends never fail the caller: an unreachable or disabled cache behaves
//! like an empty one and writes are dropped.
//!
//! - [`MemoryCache`] - in-process map, expiry checked on access
//! - [`RedisCache`] - `GET` / `SET EX` / `EXISTS` / `TTL` / `DEL`
//! - [`DisabledCache`] - always empty

mod memory;
mod redis;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::models::IndicatorKind;

pub use self::memory::MemoryCache;
pub use self::redis::RedisCache;

/// Remaining lifetime of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTtl {
    /// No such key (or the backend is unavailable).
    Missing,
    /// Present without expiry.
    Persistent,
    /// Present, expiring in this many seconds.
    Expires(u64),
}

#[async_trait]
pub trait ResultCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<Vec<u8>>;

    /// Stores `value` for `ttl_secs` seconds; `0` stores it without expiry.
    async fn set(&self, key: &str, value: &[u8], ttl_secs: u64);

    async fn exists(&self, key: &str) -> bool;

    async fn ttl(&self, key: &str) -> CacheTtl;

    async fn invalidate(&self, key: &str);
}

/// Cache that stores nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledCache;

#[async_trait]
impl ResultCache for DisabledCache {
    async fn get(&self, _key: &str) -> Option<Vec<u8>> {
        None
    }

    async fn set(&self, _key: &str, _value: &[u8], _ttl_secs: u64) {}

    async fn exists(&self, _key: &str) -> bool {
        false
    }

    async fn ttl(&self, _key: &str) -> CacheTtl {
        CacheTtl::Missing
    }

    async fn invalidate(&self, _key: &str) {}
}

/// Key for a validated raw read of `limit` samples.
#[must_use]
pub fn integrity_key(series: &str, interval: &str, limit: usize) -> String {
    format!("candle:integrity:{series}:{interval}:{limit}")
}

/// Key for a computed indicator result. Parameters are sorted by name so the
/// key does not depend on argument order.
#[must_use]
pub fn indicator_key(
    kind: IndicatorKind,
    series: &str,
    interval: &str,
    params: &[(&str, &str)],
) -> String {
    let mut params = params.to_vec();
    params.sort_unstable();
    let params = params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",");
    format!("indicator:{}:{series}:{interval}:{params}", kind.as_str())
}

/// Reads and decodes a JSON entry. Undecodable entries count as misses.
pub async fn get_json<T: DeserializeOwned>(cache: &dyn ResultCache, key: &str) -> Option<T> {
    let bytes = cache.get(key).await?;
    match serde_json::from_slice(&bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(key, "Discarding undecodable cache entry: {e}");
            None
        }
    }
}

/// Encodes `value` as JSON and stores it. Encoding failures are logged.
pub async fn set_json<T: Serialize + Sync>(
    cache: &dyn ResultCache,
    key: &str,
    value: &T,
    ttl_secs: u64,
) {
    match serde_json::to_vec(value) {
        Ok(bytes) => cache.set(key, &bytes, ttl_secs).await,
        Err(e) => warn!(key, "Failed to encode cache entry: {e}"),
    }
}
