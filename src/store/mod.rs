//! Durable time-series storage for [`Sample`]s.
//!
//! - [`sqlite`] - the production store, one table keyed by
//!   `(series, interval, ts)`
//! - [`memory`] - an in-process map with the same contract

mod memory;
mod sqlite;

use async_trait::async_trait;

use crate::Result;
use crate::models::Sample;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Read/write contract the batch writer and the integrity gate rely on.
#[async_trait]
pub trait SampleStore: Send + Sync {
    /// Upserts `samples` by `(series, interval, timestamp)`.
    ///
    /// A sample whose key already exists replaces the stored one; duplicate
    /// keys never fail the batch.
    async fn save_batch(&self, samples: &[Sample]) -> Result<()>;

    /// Returns up to `limit` of the most recent samples, oldest first.
    async fn find(&self, series: &str, interval: &str, limit: usize) -> Result<Vec<Sample>>;
}
