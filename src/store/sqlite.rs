//! SQLite-backed [`SampleStore`].

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{Connection, params};
use tracing::{debug, info};

use super::SampleStore;
use crate::Result;
use crate::models::Sample;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS candles (
        series      TEXT    NOT NULL,
        interval    TEXT    NOT NULL,
        ts          INTEGER NOT NULL,
        open        REAL    NOT NULL,
        high        REAL    NOT NULL,
        low         REAL    NOT NULL,
        close       REAL    NOT NULL,
        volume      REAL    NOT NULL,
        confirmed   INTEGER NOT NULL,
        ingested_at INTEGER NOT NULL,
        PRIMARY KEY (series, interval, ts)
    );
    CREATE INDEX IF NOT EXISTS idx_candles_ts ON candles (ts DESC);
";

const UPSERT: &str = "
    INSERT INTO candles (series, interval, ts, open, high, low, close, volume, confirmed, ingested_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
    ON CONFLICT (series, interval, ts) DO UPDATE SET
        open = excluded.open,
        high = excluded.high,
        low = excluded.low,
        close = excluded.close,
        volume = excluded.volume,
        confirmed = excluded.confirmed,
        ingested_at = excluded.ingested_at
";

/// Sample store on a single SQLite connection.
///
/// Queries run on the blocking pool so they never stall the runtime.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) the database file and ensures the schema exists.
    ///
    /// # Errors
    ///
    /// Returns [`CandlekeepError::Store`](crate::CandlekeepError::Store) if the
    /// file cannot be opened or the schema cannot be created.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        // Best effort; some filesystems refuse WAL.
        let _ = conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;");
        Self::init(conn, &path.display().to_string())
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`CandlekeepError::Store`](crate::CandlekeepError::Store) if the
    /// schema cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?, ":memory:")
    }

    fn init(conn: Connection, label: &str) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        info!(db = label, "Sample store ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn save_blocking(conn: &Mutex<Connection>, samples: &[Sample]) -> Result<()> {
        let mut conn = conn.lock().unwrap_or_else(|e| e.into_inner());
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(UPSERT)?;
            for s in samples {
                stmt.execute(params![
                    s.series,
                    s.interval,
                    s.timestamp,
                    s.open,
                    s.high,
                    s.low,
                    s.close,
                    s.volume,
                    s.confirmed,
                    s.ingested_at,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn find_blocking(
        conn: &Mutex<Connection>,
        series: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Sample>> {
        let conn = conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare_cached(
            "SELECT series, interval, ts, open, high, low, close, volume, confirmed, ingested_at
             FROM candles
             WHERE series = ?1 AND interval = ?2
             ORDER BY ts DESC
             LIMIT ?3",
        )?;

        let mut samples = stmt
            .query_map(params![series, interval, limit as i64], |row| {
                Ok(Sample {
                    series: row.get(0)?,
                    interval: row.get(1)?,
                    timestamp: row.get(2)?,
                    open: row.get(3)?,
                    high: row.get(4)?,
                    low: row.get(5)?,
                    close: row.get(6)?,
                    volume: row.get(7)?,
                    confirmed: row.get(8)?,
                    ingested_at: row.get(9)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        // Reverse to chronological order.
        samples.reverse();
        Ok(samples)
    }
}

#[async_trait]
impl SampleStore for SqliteStore {
    async fn save_batch(&self, samples: &[Sample]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }

        let conn = self.conn.clone();
        let batch = samples.to_vec();
        let count = batch.len();
        tokio::task::spawn_blocking(move || Self::save_blocking(&conn, &batch)).await??;
        debug!(count, "Saved samples");

        Ok(())
    }

    async fn find(&self, series: &str, interval: &str, limit: usize) -> Result<Vec<Sample>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let conn = self.conn.clone();
        let series = series.to_string();
        let interval = interval.to_string();
        tokio::task::spawn_blocking(move || Self::find_blocking(&conn, &series, &interval, limit))
            .await?
    }
}
