//! WebSocket connection lifecycle management.
//!
//! [`ConnectionManager`] owns the single push-channel session. It reconciles
//! the subscribed candle channels against a desired matrix, pings on a fixed
//! period, treats prolonged silence as a lost connection, and reconnects with
//! Fibonacci backoff until the attempt cap is reached. After every reconnect
//! the full applied matrix is subscribed again.
//!
//! Lock order is `applied` before `session`; the reader task only ever takes
//! `session`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use tungstenite::Message as WsMessage;

use super::status::{
    ConnectionState, ConnectionStatus, LossReason, ReconnectRecord, StatusTracker,
};
use super::{ReconnectPolicy, WsReader, WsWriter, connect, parse_candle, ping, subscribe, unsubscribe};
use crate::config::ConnectionConfig;
use crate::metrics::MetricsSink;
use crate::models::{EventResponse, PONG, SubscriptionDiff, SubscriptionMatrix, now_millis};
use crate::shutdown;
use crate::writer::BatchWriter;
use crate::{CandlekeepError, Result};

/// Bound on sending a close frame to a peer that may already be gone.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// An open session: the write half plus the task draining the read half.
struct Session {
    writer: WsWriter,
    generation: u64,
    reader: JoinHandle<()>,
}

impl Session {
    async fn close(mut self, abort_reader: bool) {
        if abort_reader {
            self.reader.abort();
        }
        let _ = tokio::time::timeout(CLOSE_TIMEOUT, self.writer.close()).await;
    }
}

struct Inner {
    config: ConnectionConfig,
    policy: ReconnectPolicy,
    writer: Arc<BatchWriter>,
    metrics: Arc<dyn MetricsSink>,
    status: StatusTracker,
    /// Last matrix handed to `apply_subscriptions`. Also serializes reconciliation.
    applied: Mutex<Option<SubscriptionMatrix>>,
    session: Mutex<Option<Session>>,
    generation: AtomicU64,
    attempts: AtomicU32,
    reconnect_pending: AtomicBool,
    closing: AtomicBool,
    /// Liveness clock: milliseconds since `epoch` of the last inbound text frame.
    epoch: Instant,
    last_message: AtomicU64,
    last_message_wall: AtomicI64,
    shutdown: watch::Receiver<bool>,
}

/// Owns the push-channel session and feeds parsed samples to a [`BatchWriter`].
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Creates a manager in the `Disconnected` state.
    ///
    /// Nothing connects until the first [`apply_subscriptions`](Self::apply_subscriptions).
    #[must_use]
    pub fn new(
        config: ConnectionConfig,
        writer: Arc<BatchWriter>,
        metrics: Arc<dyn MetricsSink>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let policy = ReconnectPolicy::new(
            config.initial_reconnect_interval,
            config.max_reconnect_attempts,
        );
        let status = StatusTracker::new(config.url.clone());

        Self {
            inner: Arc::new(Inner {
                config,
                policy,
                writer,
                metrics,
                status,
                applied: Mutex::new(None),
                session: Mutex::new(None),
                generation: AtomicU64::new(0),
                attempts: AtomicU32::new(0),
                reconnect_pending: AtomicBool::new(false),
                closing: AtomicBool::new(false),
                epoch: Instant::now(),
                last_message: AtomicU64::new(0),
                last_message_wall: AtomicI64::new(0),
                shutdown,
            }),
        }
    }

    /// Makes the subscribed channels match `desired`.
    ///
    /// Calls are serialized. With a live session only the difference is sent,
    /// unsubscribe first. While a reconnect is pending the matrix is recorded
    /// and delivered by the reconnect. Without a session a connection is
    /// opened and the whole matrix is subscribed.
    ///
    /// In `Error` this makes a single connection attempt and leaves the
    /// exhausted attempt counter alone, so a failure returns straight to
    /// `Error`. Use [`reconnect_now`](Self::reconnect_now) to start a fresh
    /// backoff cycle.
    ///
    /// # Errors
    ///
    /// Returns a [`CandlekeepError`](crate::CandlekeepError) only if a new
    /// connection had to be opened and could not be. A reconnect is scheduled
    /// in that case.
    pub async fn apply_subscriptions(&self, desired: SubscriptionMatrix) -> Result<()> {
        let inner = &self.inner;
        let mut applied = inner.applied.lock().await;

        match inner.status.state() {
            ConnectionState::Connected => {
                let diff = SubscriptionDiff::between(applied.as_ref(), &desired);
                if diff.is_empty() {
                    debug!("Subscriptions already up to date");
                } else if let Err(e) = inner.send_diff(&diff).await {
                    warn!("Failed to update subscriptions: {e}");
                }
                *applied = Some(desired);
                Ok(())
            }
            ConnectionState::Connecting | ConnectionState::Reconnecting => {
                debug!("Reconnect pending, recording subscriptions");
                *applied = Some(desired);
                Ok(())
            }
            ConnectionState::Disconnected | ConnectionState::Error => {
                let result = inner.connect_and_subscribe(&desired).await;
                *applied = Some(desired);
                result
            }
        }
    }

    /// Clears the attempt counter and reconnects with the recorded matrix.
    ///
    /// This is the manual way out of `Error`. A failed attempt starts a new
    /// backoff cycle. Does nothing while a session is open or a reconnect is
    /// already under way.
    ///
    /// # Errors
    ///
    /// Returns a [`CandlekeepError`](crate::CandlekeepError) if the connection
    /// could not be opened.
    pub async fn reconnect_now(&self) -> Result<()> {
        let inner = &self.inner;
        let applied = inner.applied.lock().await;

        match inner.status.state() {
            ConnectionState::Disconnected | ConnectionState::Error => {
                info!("Resetting reconnect attempts");
                inner.attempts.store(0, Ordering::Release);
                inner.status.set_reconnect(0, 0);
                let matrix = applied.clone().unwrap_or_default();
                inner.connect_and_subscribe(&matrix).await
            }
            state => {
                debug!(state = state.as_str(), "Reconnect not needed");
                Ok(())
            }
        }
    }

    /// Spawns the heartbeat task. It stops when shutdown is signalled.
    pub fn start(&self) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.heartbeat_loop().await })
    }

    /// Closes the session and stops automatic recovery.
    pub async fn close(&self) {
        self.inner.closing.store(true, Ordering::Release);
        let session = {
            let mut guard = self.inner.session.lock().await;
            self.inner.status.set_state(ConnectionState::Disconnected);
            guard.take()
        };
        if let Some(session) = session {
            session.close(true).await;
            info!("WebSocket session closed");
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.status.state()
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        let mut status = self.inner.status.snapshot();
        let wall = self.inner.last_message_wall.load(Ordering::Acquire);
        status.last_message_at_ms = (wall > 0).then_some(wall);
        status
    }

    /// Reconnect and connection-loss events, most recent first.
    #[must_use]
    pub fn history(&self, limit: usize) -> Vec<ReconnectRecord> {
        self.inner.status.history(limit)
    }

    pub fn clear_history(&self) {
        self.inner.status.clear_history();
    }

    /// The matrix the manager is currently trying to deliver.
    pub async fn applied_subscriptions(&self) -> Option<SubscriptionMatrix> {
        self.inner.applied.lock().await.clone()
    }
}

impl Inner {
    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire) || *self.shutdown.borrow()
    }

    fn mark_message(&self) {
        let elapsed = self.epoch.elapsed().as_millis() as u64;
        self.last_message.store(elapsed, Ordering::Release);
        self.last_message_wall.store(now_millis(), Ordering::Release);
    }

    fn millis_since_last_message(&self) -> u64 {
        let now = self.epoch.elapsed().as_millis() as u64;
        now.saturating_sub(self.last_message.load(Ordering::Acquire))
    }

    /// Opens a new session and starts its reader.
    async fn establish(self: &Arc<Self>) -> Result<()> {
        self.status.set_state(ConnectionState::Connecting);
        info!(url = %self.config.url, "Connecting to WebSocket");

        let (write, read) = match connect(&self.config.url).await {
            Ok(pair) => pair,
            Err(e) => {
                self.status.set_error(e.to_string());
                self.status.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        let mut session = self.session.lock().await;
        if self.is_closing() {
            drop(session);
            let mut write = write;
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, write.close()).await;
            self.status.set_state(ConnectionState::Disconnected);
            info!("Discarding connection opened during close");
            return Err(CandlekeepError::NotConnected(
                "manager closed during handshake".into(),
            ));
        }

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.mark_message();
        self.attempts.store(0, Ordering::Release);
        self.status.set_reconnect(0, 0);

        let reader = tokio::spawn(Arc::clone(self).read_loop(read, generation));
        let stale = session.replace(Session {
            writer: write,
            generation,
            reader,
        });
        self.status.set_state(ConnectionState::Connected);
        drop(session);

        if let Some(stale) = stale {
            stale.close(true).await;
        }
        info!(generation, "WebSocket connected");

        Ok(())
    }

    /// Opens a session and subscribes `matrix`, or schedules a reconnect.
    ///
    /// The caller holds the `applied` lock, so the scheduled reconnect cannot
    /// run before the caller has recorded its matrix.
    async fn connect_and_subscribe(self: &Arc<Self>, matrix: &SubscriptionMatrix) -> Result<()> {
        match self.establish().await {
            Ok(()) => {
                self.subscribe_all(matrix).await;
                Ok(())
            }
            Err(e) => {
                error!("Connection failed: {e}");
                self.schedule_reconnect();
                Err(e)
            }
        }
    }

    async fn send_diff(&self, diff: &SubscriptionDiff) -> Result<()> {
        let mut session = self.session.lock().await;
        let Some(session) = session.as_mut() else {
            return Err(CandlekeepError::NotConnected(
                "session lost during reconciliation".into(),
            ));
        };

        unsubscribe(&mut session.writer, &diff.unsubscribe).await?;
        subscribe(&mut session.writer, &diff.subscribe).await?;
        info!(
            unsubscribed = diff.unsubscribe.len(),
            subscribed = diff.subscribe.len(),
            "Subscriptions reconciled"
        );

        Ok(())
    }

    async fn subscribe_all(&self, matrix: &SubscriptionMatrix) {
        let mut session = self.session.lock().await;
        let Some(session) = session.as_mut() else {
            return;
        };
        if let Err(e) = subscribe(&mut session.writer, &matrix.pairs()).await {
            warn!("Failed to subscribe: {e}");
        }
    }

    /// Drains the read half until the peer goes away.
    async fn read_loop(self: Arc<Self>, mut read: WsReader, generation: u64) {
        let (reason, error) = loop {
            match read.next().await {
                Some(Ok(WsMessage::Text(text))) => self.handle_text(&text),
                Some(Ok(WsMessage::Close(frame))) => {
                    info!(?frame, "Server closed connection");
                    break (LossReason::ConnectionClosed, None);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("WebSocket read error: {e}");
                    break (LossReason::TransportError, Some(e.to_string()));
                }
                None => break (LossReason::ConnectionClosed, None),
            }
        };

        self.on_connection_lost(generation, reason, error).await;
    }

    fn handle_text(&self, text: &str) {
        self.mark_message();
        self.metrics.message_received(text.len());

        if text.trim().eq_ignore_ascii_case(PONG) {
            return;
        }

        if let Some(sample) = parse_candle(text) {
            self.writer.add(sample);
            return;
        }

        match serde_json::from_str::<EventResponse>(text) {
            Ok(event) if event.event == "error" => {
                warn!(code = ?event.code, msg = ?event.msg, "Server reported error");
            }
            Ok(event) => debug!(event = %event.event, arg = ?event.arg, "Server event"),
            Err(_) => {
                self.metrics.parse_failure();
                debug!(len = text.len(), "Dropping unparseable frame");
            }
        }
    }

    /// Tears down session `generation` and schedules recovery.
    ///
    /// Events for a session that was already replaced or closed are ignored.
    async fn on_connection_lost(
        self: &Arc<Self>,
        generation: u64,
        reason: LossReason,
        error: Option<String>,
    ) {
        if self.is_closing() {
            return;
        }

        let session = {
            let mut guard = self.session.lock().await;
            if guard.as_ref().is_some_and(|s| s.generation == generation) {
                guard.take()
            } else {
                None
            }
        };
        let Some(session) = session else {
            return;
        };

        // The reader reports its own exit and must not abort itself.
        session
            .close(reason == LossReason::HeartbeatTimeout)
            .await;

        warn!(reason = reason.as_str(), generation, "Connection lost");
        if let Some(e) = &error {
            self.status.set_error(e.clone());
        }
        self.status.set_state(ConnectionState::Disconnected);
        self.status.record(ReconnectRecord {
            timestamp_ms: now_millis(),
            reason,
            attempt: self.attempts.load(Ordering::Acquire),
            success: false,
            duration_ms: None,
            error,
        });

        self.schedule_reconnect();
    }

    /// Arms the next reconnect attempt, or enters `Error` past the cap.
    fn schedule_reconnect(self: &Arc<Self>) {
        if self.policy.max_attempts == 0 {
            info!("Automatic reconnect disabled");
            return;
        }
        if self.is_closing() || self.reconnect_pending.swap(true, Ordering::AcqRel) {
            return;
        }

        let attempt = self.attempts.fetch_add(1, Ordering::AcqRel) + 1;
        let Some(delay) = self.policy.delay_for(attempt) else {
            self.reconnect_pending.store(false, Ordering::Release);
            self.status.set_reconnect(attempt, 0);
            self.status.set_state(ConnectionState::Error);
            error!(
                attempt,
                max = self.policy.max_attempts,
                "Reconnect attempts exhausted"
            );
            return;
        };

        let delay_ms = delay.as_millis() as u64;
        self.status.set_reconnect(attempt, delay_ms);
        self.status.set_state(ConnectionState::Reconnecting);
        info!(attempt, delay_ms, "Scheduling reconnect");

        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.reconnect(attempt, delay).await });
    }

    async fn reconnect(self: Arc<Self>, attempt: u32, delay: Duration) {
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = shutdown::requested(&mut shutdown) => {
                self.reconnect_pending.store(false, Ordering::Release);
                return;
            }
        }

        let applied = self.applied.lock().await;
        self.reconnect_pending.store(false, Ordering::Release);
        if self.is_closing() {
            return;
        }
        if self.status.state() == ConnectionState::Connected {
            self.attempts.store(0, Ordering::Release);
            self.status.set_reconnect(0, 0);
            debug!(attempt, "Session already re-established");
            return;
        }

        let started = Instant::now();
        match self.establish().await {
            Ok(()) => {
                if let Some(matrix) = applied.as_ref() {
                    self.subscribe_all(matrix).await;
                }
                let duration_ms = started.elapsed().as_millis() as u64;
                self.status.record(ReconnectRecord {
                    timestamp_ms: now_millis(),
                    reason: LossReason::ScheduledReconnect,
                    attempt,
                    success: true,
                    duration_ms: Some(duration_ms),
                    error: None,
                });
                info!(attempt, duration_ms, "Reconnected");
            }
            Err(e) => {
                self.status.record(ReconnectRecord {
                    timestamp_ms: now_millis(),
                    reason: LossReason::ScheduledReconnect,
                    attempt,
                    success: false,
                    duration_ms: None,
                    error: Some(e.to_string()),
                });
                warn!(attempt, "Reconnect failed: {e}");
                // Armed under the lock so no apply can slip in first.
                self.schedule_reconnect();
                drop(applied);
            }
        }
    }

    async fn heartbeat_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        let mut shutdown = self.shutdown.clone();

        loop {
            tokio::select! {
                _ = ticker.tick() => self.heartbeat().await,
                () = shutdown::requested(&mut shutdown) => {
                    debug!("Heartbeat stopping");
                    break;
                }
            }
        }
    }

    async fn heartbeat(self: &Arc<Self>) {
        let generation = {
            let mut guard = self.session.lock().await;
            let Some(session) = guard.as_mut() else {
                return;
            };
            if let Err(e) = ping(&mut session.writer).await {
                warn!("Ping failed: {e}");
            }
            session.generation
        };

        let silent_ms = self.millis_since_last_message();
        let timeout_ms = self.config.heartbeat_timeout.as_millis() as u64;
        if silent_ms > timeout_ms {
            warn!(silent_ms, timeout_ms, "Heartbeat timeout");
            self.on_connection_lost(
                generation,
                LossReason::HeartbeatTimeout,
                Some(format!("no message for {silent_ms} ms")),
            )
            .await;
        }
    }
}
