use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{CacheTtl, ResultCache};
use crate::Result;

/// Redis-backed cache.
///
/// The connection is opened on first use and dropped after any command
/// error, so the next call reconnects. Errors are logged and reported as a
/// miss.
pub struct RedisCache {
    client: redis::Client,
    conn: Mutex<Option<MultiplexedConnection>>,
}

impl RedisCache {
    /// Parses `url` without connecting.
    ///
    /// # Errors
    ///
    /// Returns [`CandlekeepError::Cache`](crate::CandlekeepError::Cache) if the
    /// URL is malformed.
    pub fn new(url: &str) -> Result<Self> {
        Ok(Self {
            client: redis::Client::open(url)?,
            conn: Mutex::new(None),
        })
    }

    async fn connection(&self) -> redis::RedisResult<MultiplexedConnection> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self.client.get_multiplexed_async_connection().await?;
        info!("Connected to Redis");
        *guard = Some(conn.clone());
        Ok(conn)
    }

    async fn run<T: redis::FromRedisValue>(&self, cmd: &redis::Cmd) -> Option<T> {
        let mut conn = match self.connection().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Redis unavailable: {e}");
                return None;
            }
        };

        let result: redis::RedisResult<T> = cmd.query_async(&mut conn).await;
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Redis command failed: {e}");
                *self.conn.lock().await = None;
                None
            }
        }
    }
}

#[async_trait]
impl ResultCache for RedisCache {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let value: Option<Option<Vec<u8>>> = self.run(redis::cmd("GET").arg(key)).await;
        value.flatten()
    }

    async fn set(&self, key: &str, value: &[u8], ttl_secs: u64) {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if ttl_secs > 0 {
            cmd.arg("EX").arg(ttl_secs);
        }
        let _: Option<()> = self.run(&cmd).await;
    }

    async fn exists(&self, key: &str) -> bool {
        let found: Option<bool> = self.run(redis::cmd("EXISTS").arg(key)).await;
        found.unwrap_or(false)
    }

    async fn ttl(&self, key: &str) -> CacheTtl {
        let secs: Option<i64> = self.run(redis::cmd("TTL").arg(key)).await;
        match secs {
            Some(-1) => CacheTtl::Persistent,
            Some(s) if s >= 0 => CacheTtl::Expires(s as u64),
            _ => CacheTtl::Missing,
        }
    }

    async fn invalidate(&self, key: &str) {
        let _: Option<i64> = self.run(redis::cmd("DEL").arg(key)).await;
    }
}
