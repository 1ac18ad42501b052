//! Async WebSocket client for the OKX v5 candle channels.
//!
//! This module is organized by concern:
//! - [`subscription`] - Batched subscribe/unsubscribe frames
//! - [`parser`] - Candle frame to [`Sample`](crate::models::Sample) translation
//! - [`backoff`] - Fibonacci reconnect delays
//! - [`status`] - Connection state and reconnect history
//! - [`connection`] - Session lifecycle, heartbeat and reconciliation

mod backoff;
mod connection;
mod parser;
mod status;
mod subscription;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};
use tungstenite::Message;

use crate::Result;
use crate::models::PING;

pub use backoff::{ReconnectPolicy, fibonacci};
pub use connection::ConnectionManager;
pub use parser::parse_candle;
pub use status::{
    ConnectionState, ConnectionStatus, HISTORY_CAPACITY, LossReason, ReconnectRecord,
    StatusTracker,
};
pub use subscription::{subscribe, unsubscribe};

/// Write half of an OKX WebSocket connection.
pub type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Read half of an OKX WebSocket connection.
pub type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Establishes a WebSocket connection to the given URL.
///
/// # Errors
///
/// Returns a [`CandlekeepError`](crate::CandlekeepError) if the connection or TLS handshake fails.
pub async fn connect(url: &str) -> Result<(WsWriter, WsReader)> {
    let (ws_stream, _) = connect_async(url).await?;
    info!(url, "WebSocket handshake completed");

    Ok(ws_stream.split())
}

/// Sends the bare-text keepalive ping.
///
/// # Errors
///
/// Returns a [`CandlekeepError`](crate::CandlekeepError) if sending the message fails.
pub async fn ping(write: &mut WsWriter) -> Result<()> {
    write.send(Message::Text(PING.into())).await?;
    debug!("Sent ping");

    Ok(())
}
