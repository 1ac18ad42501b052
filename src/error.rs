//! Crate-level error types.
//!
//! [`CandlekeepError`] unifies every error source (configuration, WebSocket,
//! HTTP, SQLite, Redis, JSON) behind a single enum so callers can match on the
//! variant they care about while still using the `?` operator for easy
//! propagation.
//!
//! Most of these never escape a background task: the ingestion path turns
//! them into log lines and connection-state transitions instead.

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CandlekeepError>;

/// Top-level error type returned by all public APIs.
#[derive(Debug, thiserror::Error)]
pub enum CandlekeepError {
    /// An environment variable or subscription file held an invalid value.
    #[error("configuration error: {0}")]
    Config(String),

    /// A WebSocket operation (connect, send, receive) failed.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// The push-channel session is not open.
    #[error("not connected: {0}")]
    NotConnected(String),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// An HTTP request to the REST API failed.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The REST API answered with a non-zero status code.
    #[error("okx api error: code={code} msg={msg}")]
    Api { code: String, msg: String },

    /// The sample store rejected a read or write.
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// The Redis cache backend failed.
    #[error("cache error: {0}")]
    Cache(#[from] redis::RedisError),

    /// Filesystem access failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A blocking task panicked or was cancelled.
    #[error("task error: {0}")]
    Task(#[from] tokio::task::JoinError),
}
