use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{CacheTtl, ResultCache};

#[derive(Debug)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Process-local cache. Expired entries are dropped when next touched.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_live<R>(&self, key: &str, f: impl FnOnce(&Entry) -> R) -> Option<R> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Some(f(entry)),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl ResultCache for MemoryCache {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.with_live(key, |entry| entry.value.clone())
    }

    async fn set(&self, key: &str, value: &[u8], ttl_secs: u64) {
        let expires_at = (ttl_secs > 0).then(|| Instant::now() + Duration::from_secs(ttl_secs));
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                key.to_string(),
                Entry {
                    value: value.to_vec(),
                    expires_at,
                },
            );
    }

    async fn exists(&self, key: &str) -> bool {
        self.with_live(key, |_| ()).is_some()
    }

    async fn ttl(&self, key: &str) -> CacheTtl {
        let now = Instant::now();
        self.with_live(key, |entry| match entry.expires_at {
            None => CacheTtl::Persistent,
            Some(at) => CacheTtl::Expires(at.saturating_duration_since(now).as_secs()),
        })
        .unwrap_or(CacheTtl::Missing)
    }

    async fn invalidate(&self, key: &str) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }
}
