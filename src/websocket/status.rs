//! Observable connection state and the reconnect audit trail.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;

use crate::models::now_millis;

/// Maximum number of reconnect records kept in memory.
pub const HISTORY_CAPACITY: usize = 1000;

/// Lifecycle state of the push-channel session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Reconnect attempts are exhausted; only an explicit call recovers.
    Error,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Reconnecting => "RECONNECTING",
            ConnectionState::Error => "ERROR",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Reconnecting,
            4 => ConnectionState::Error,
            _ => ConnectionState::Disconnected,
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Reconnecting => 3,
            ConnectionState::Error => 4,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session ended or a reconnect was attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LossReason {
    TransportError,
    ConnectionClosed,
    HeartbeatTimeout,
    ScheduledReconnect,
}

impl LossReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            LossReason::TransportError => "transport-error",
            LossReason::ConnectionClosed => "connection-closed",
            LossReason::HeartbeatTimeout => "heartbeat-timeout",
            LossReason::ScheduledReconnect => "scheduled-reconnect",
        }
    }
}

/// One audited reconnect event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconnectRecord {
    pub timestamp_ms: i64,
    pub reason: LossReason,
    pub attempt: u32,
    pub success: bool,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
}

/// Read-only snapshot handed to observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub url: String,
    pub connected_at_ms: Option<i64>,
    pub disconnected_at_ms: Option<i64>,
    pub last_message_at_ms: Option<i64>,
    pub reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct Details {
    connected_at_ms: Option<i64>,
    disconnected_at_ms: Option<i64>,
    reconnect_attempts: u32,
    reconnect_delay_ms: u64,
    last_error: Option<String>,
    history: VecDeque<ReconnectRecord>,
}

/// Single-writer state cell plus the bounded reconnect history.
#[derive(Debug)]
pub struct StatusTracker {
    url: String,
    state: AtomicU8,
    details: Mutex<Details>,
}

impl StatusTracker {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            state: AtomicU8::new(ConnectionState::Disconnected.to_u8()),
            details: Mutex::new(Details::default()),
        }
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.state.store(state.to_u8(), Ordering::Release);

        let mut details = self.details();
        match state {
            ConnectionState::Connected => {
                details.connected_at_ms = Some(now_millis());
                details.last_error = None;
            }
            ConnectionState::Disconnected | ConnectionState::Error => {
                details.disconnected_at_ms = Some(now_millis());
            }
            ConnectionState::Connecting | ConnectionState::Reconnecting => {}
        }
    }

    pub fn set_error(&self, error: impl Into<String>) {
        self.details().last_error = Some(error.into());
    }

    pub fn set_reconnect(&self, attempts: u32, delay_ms: u64) {
        let mut details = self.details();
        details.reconnect_attempts = attempts;
        details.reconnect_delay_ms = delay_ms;
    }

    /// Appends an event, evicting the oldest once full.
    pub fn record(&self, record: ReconnectRecord) {
        let mut details = self.details();
        if details.history.len() >= HISTORY_CAPACITY {
            details.history.pop_back();
        }
        details.history.push_front(record);
    }

    /// Snapshot without the last-message time, which the session owner
    /// tracks on its own hot path.
    #[must_use]
    pub fn snapshot(&self) -> ConnectionStatus {
        let details = self.details();
        ConnectionStatus {
            state: self.state(),
            url: self.url.clone(),
            connected_at_ms: details.connected_at_ms,
            disconnected_at_ms: details.disconnected_at_ms,
            last_message_at_ms: None,
            reconnect_attempts: details.reconnect_attempts,
            reconnect_delay_ms: details.reconnect_delay_ms,
            last_error: details.last_error.clone(),
        }
    }

    /// Most recent records first, at most `limit` of them.
    #[must_use]
    pub fn history(&self, limit: usize) -> Vec<ReconnectRecord> {
        self.details().history.iter().take(limit).cloned().collect()
    }

    pub fn clear_history(&self) {
        self.details().history.clear();
    }

    fn details(&self) -> std::sync::MutexGuard<'_, Details> {
        self.details.lock().unwrap_or_else(|e| e.into_inner())
    }
}
