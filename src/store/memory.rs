//! In-process [`SampleStore`], ordered by key.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::SampleStore;
use crate::Result;
use crate::models::{Sample, SampleKey};

#[derive(Debug, Default)]
pub struct MemoryStore {
    samples: Mutex<BTreeMap<SampleKey, Sample>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored samples across all series.
    pub fn len(&self) -> usize {
        self.samples.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SampleStore for MemoryStore {
    async fn save_batch(&self, samples: &[Sample]) -> Result<()> {
        let mut map = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        for sample in samples {
            map.insert(sample.key(), sample.clone());
        }
        Ok(())
    }

    async fn find(&self, series: &str, interval: &str, limit: usize) -> Result<Vec<Sample>> {
        let map = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        let mut newest_first: Vec<Sample> = map
            .values()
            .rev()
            .filter(|s| s.series == series && s.interval == interval)
            .take(limit)
            .cloned()
            .collect();
        newest_first.reverse();
        Ok(newest_first)
    }
}
