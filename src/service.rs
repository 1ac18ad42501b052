//! Component wiring and ordered shutdown.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::Result;
use crate::cache::{DisabledCache, MemoryCache, RedisCache, ResultCache};
use crate::config::{AppConfig, CacheConfig};
use crate::integrity::IntegrityGate;
use crate::metrics::{IngestMetrics, MetricsSink};
use crate::rest::{CandleSource, OkxRestClient};
use crate::shutdown;
use crate::store::{SampleStore, SqliteStore};
use crate::subscription::{
    BOOT_RETRY_DELAY, FileSubscriptionSource, SubscriptionSource, spawn_boot_task,
    spawn_refresh_task,
};
use crate::websocket::ConnectionManager;
use crate::writer::BatchWriter;

/// The running pipeline: ingestion tasks plus the integrity-checked read path.
pub struct Service {
    config: AppConfig,
    metrics: Arc<IngestMetrics>,
    writer: Arc<BatchWriter>,
    manager: ConnectionManager,
    gate: Arc<IntegrityGate>,
    shutdown_tx: watch::Sender<bool>,
    timers: Vec<JoinHandle<()>>,
    /// Boot and refresh tasks; aborted on shutdown since they may be
    /// blocked in a connect.
    reconcilers: Vec<JoinHandle<()>>,
}

impl Service {
    /// Builds every component from `config` and starts the background tasks.
    ///
    /// Returns as soon as the tasks are spawned; the first connection is
    /// made by the boot task.
    ///
    /// # Errors
    ///
    /// Returns a [`CandlekeepError`](crate::CandlekeepError) if the store
    /// cannot be opened or a client cannot be built.
    pub fn start(config: AppConfig) -> Result<Self> {
        let store: Arc<dyn SampleStore> = Arc::new(SqliteStore::open(&config.store.db_path)?);
        let source: Arc<dyn SubscriptionSource> = Arc::new(FileSubscriptionSource::new(
            config.subscription.file.clone(),
            config.subscription.fallback.clone(),
        ));
        Self::start_with(config, store, source)
    }

    /// Like [`start`](Self::start) with an explicit store and subscription source.
    ///
    /// # Errors
    ///
    /// Returns a [`CandlekeepError`](crate::CandlekeepError) if a client
    /// cannot be built.
    pub fn start_with(
        config: AppConfig,
        store: Arc<dyn SampleStore>,
        source: Arc<dyn SubscriptionSource>,
    ) -> Result<Self> {
        let metrics = Arc::new(IngestMetrics::new());
        let sink: Arc<dyn MetricsSink> = metrics.clone();
        let (shutdown_tx, shutdown_rx) = shutdown::channel();

        let cache = build_cache(&config.cache)?;
        let rest: Arc<dyn CandleSource> = Arc::new(OkxRestClient::new(
            config.okx.rest_url.clone(),
            config.okx.rest_timeout,
        )?);

        let writer = Arc::new(BatchWriter::new(store.clone(), sink.clone()));
        let manager = ConnectionManager::new(
            config.connection.clone(),
            writer.clone(),
            sink.clone(),
            shutdown_rx.clone(),
        );
        let gate = Arc::new(IntegrityGate::new(
            store,
            cache,
            rest,
            sink,
            config.integrity.clone(),
        ));

        let timers = vec![
            writer.spawn_flush_task(config.batch.flush_interval, shutdown_rx.clone()),
            manager.start(),
        ];
        let reconcilers = vec![
            spawn_boot_task(
                source.clone(),
                manager.clone(),
                BOOT_RETRY_DELAY,
                shutdown_rx.clone(),
            ),
            spawn_refresh_task(
                source,
                manager.clone(),
                config.subscription.refresh_interval,
                shutdown_rx,
            ),
        ];
        info!(url = %config.connection.url, "Service started");

        Ok(Self {
            config,
            metrics,
            writer,
            manager,
            gate,
            shutdown_tx,
            timers,
            reconcilers,
        })
    }

    pub fn gate(&self) -> Arc<IntegrityGate> {
        self.gate.clone()
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn writer(&self) -> Arc<BatchWriter> {
        self.writer.clone()
    }

    pub fn metrics(&self) -> Arc<IngestMetrics> {
        self.metrics.clone()
    }

    /// Stops the timers, flushes what is buffered within the grace period,
    /// then releases the session.
    pub async fn shutdown(self) {
        info!("Shutting down");
        let _ = self.shutdown_tx.send(true);

        for task in &self.reconcilers {
            task.abort();
        }
        for task in self.timers {
            if let Err(e) = task.await {
                warn!("Background task ended abnormally: {e}");
            }
        }

        let grace = self.config.batch.shutdown_grace;
        match tokio::time::timeout(grace, self.writer.flush()).await {
            Ok(count) => info!(count, "Final flush complete"),
            Err(_) => warn!(
                grace_ms = grace.as_millis() as u64,
                buffered = self.writer.size(),
                "Final flush timed out"
            ),
        }

        self.manager.close().await;
        info!("Shutdown complete");
    }
}

fn build_cache(config: &CacheConfig) -> Result<Arc<dyn ResultCache>> {
    if !config.enabled {
        info!("Result cache disabled");
        return Ok(Arc::new(DisabledCache));
    }

    match &config.redis_url {
        Some(url) => {
            info!("Using Redis result cache");
            Ok(Arc::new(RedisCache::new(url)?))
        }
        None => {
            info!("Using in-memory result cache");
            Ok(Arc::new(MemoryCache::new()))
        }
    }
}
