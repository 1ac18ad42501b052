//! Sources of the desired subscription matrix and the tasks that push it
//! into the [`ConnectionManager`].

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::models::SubscriptionMatrix;
use crate::shutdown;
use crate::websocket::ConnectionManager;
use crate::{CandlekeepError, Result};

/// Delay between boot attempts while the source is unavailable.
pub const BOOT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Supplies the `(series x interval)` matrix the service should receive.
#[async_trait]
pub trait SubscriptionSource: Send + Sync {
    async fn current_matrix(&self) -> Result<SubscriptionMatrix>;
}

/// A fixed matrix.
#[derive(Debug, Clone)]
pub struct StaticSubscriptionSource {
    matrix: SubscriptionMatrix,
}

impl StaticSubscriptionSource {
    #[must_use]
    pub fn new(matrix: SubscriptionMatrix) -> Self {
        Self { matrix }
    }
}

#[async_trait]
impl SubscriptionSource for StaticSubscriptionSource {
    async fn current_matrix(&self) -> Result<SubscriptionMatrix> {
        Ok(self.matrix.clone())
    }
}

/// Reads `{"symbols": [...], "intervals": [...]}` from a JSON file on every
/// call, so edits take effect on the next refresh.
#[derive(Debug, Clone)]
pub struct FileSubscriptionSource {
    path: PathBuf,
    fallback: SubscriptionMatrix,
}

impl FileSubscriptionSource {
    /// `fallback` is returned while the file does not exist.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, fallback: SubscriptionMatrix) -> Self {
        Self {
            path: path.into(),
            fallback,
        }
    }
}

#[async_trait]
impl SubscriptionSource for FileSubscriptionSource {
    async fn current_matrix(&self) -> Result<SubscriptionMatrix> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No subscription file, using fallback");
                return Ok(self.fallback.clone());
            }
            Err(e) => return Err(e.into()),
        };

        let matrix: SubscriptionMatrix = serde_json::from_slice(&raw)?;
        if matrix.is_empty() {
            return Err(CandlekeepError::Config(format!(
                "{} lists no symbol/interval pairs",
                self.path.display()
            )));
        }

        Ok(matrix)
    }
}

/// Applies the source's matrix once at startup without blocking boot.
///
/// While the source is unavailable the task retries every `retry_delay`.
/// A failed first connection is logged; the manager's own reconnect loop
/// takes over from there.
pub fn spawn_boot_task(
    source: std::sync::Arc<dyn SubscriptionSource>,
    manager: ConnectionManager,
    retry_delay: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let matrix = loop {
            match source.current_matrix().await {
                Ok(matrix) => break matrix,
                Err(e) => {
                    warn!("Subscription source unavailable, retrying: {e}");
                    tokio::select! {
                        () = tokio::time::sleep(retry_delay) => {}
                        () = shutdown::requested(&mut shutdown) => return,
                    }
                }
            }
        };

        info!(
            series = matrix.series.len(),
            intervals = matrix.intervals.len(),
            "Applying initial subscriptions"
        );
        if let Err(e) = manager.apply_subscriptions(matrix).await {
            warn!("Initial connection failed, reconnect scheduled: {e}");
        }
    })
}

/// Re-reads the source every `period` and applies any change.
pub fn spawn_refresh_task(
    source: std::sync::Arc<dyn SubscriptionSource>,
    manager: ConnectionManager,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                () = shutdown::requested(&mut shutdown) => break,
            }

            match source.current_matrix().await {
                Ok(matrix) => {
                    if let Err(e) = manager.apply_subscriptions(matrix).await {
                        warn!("Subscription refresh failed: {e}");
                    }
                }
                Err(e) => warn!("Subscription source unavailable: {e}"),
            }
        }
    })
}
