//! Shared test utilities: sample builders, store/source fakes and an
//! in-process WebSocket server.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{Notify, mpsc};
use tungstenite::Message;

use candlekeep::models::Sample;
use candlekeep::rest::CandleSource;
use candlekeep::store::{MemoryStore, SampleStore};
use candlekeep::{CandlekeepError, Result};

/// 2023-11-14T22:13:00Z, aligned to a minute.
pub const BASE_TS: i64 = 1_699_999_980_000;

pub const SERIES: &str = "BTC-USDT-SWAP";

pub fn sample(series: &str, interval: &str, timestamp: i64, close: f64) -> Sample {
    Sample {
        series: series.to_string(),
        interval: interval.to_string(),
        timestamp,
        open: close,
        high: close + 1.0,
        low: close - 1.0,
        close,
        volume: 10.0,
        confirmed: true,
        ingested_at: 0,
    }
}

/// `count` one-minute samples starting at [`BASE_TS`], oldest first.
pub fn minute_window(count: usize) -> Vec<Sample> {
    (0..count)
        .map(|i| sample(SERIES, "1m", BASE_TS + i as i64 * 60_000, 100.0 + i as f64))
        .collect()
}

/// A push-channel data frame carrying one candle row.
pub fn candle_frame(series: &str, interval: &str, timestamp: i64, close: f64) -> String {
    serde_json::json!({
        "arg": { "channel": format!("candle{interval}"), "instId": series },
        "data": [[
            timestamp.to_string(), "1", "2", "0.5", close.to_string(), "3", "0", "0", "0"
        ]]
    })
    .to_string()
}

/// Polls `condition` every 10ms until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Store that records every call and can be switched into failure mode.
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryStore,
    pub saves: Mutex<Vec<Vec<Sample>>>,
    pub finds: AtomicUsize,
    pub fail_saves: AtomicBool,
    pub fail_finds: AtomicBool,
    /// When set, `find` returns this instead of the stored data.
    pub canned_find: Mutex<Option<Vec<Sample>>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_find(samples: Vec<Sample>) -> Self {
        let store = Self::default();
        *store.canned_find.lock().unwrap() = Some(samples);
        store
    }

    pub fn save_calls(&self) -> Vec<Vec<Sample>> {
        self.saves.lock().unwrap().clone()
    }

    pub fn stored(&self) -> usize {
        self.inner.len()
    }
}

#[async_trait]
impl SampleStore for RecordingStore {
    async fn save_batch(&self, samples: &[Sample]) -> Result<()> {
        self.saves.lock().unwrap().push(samples.to_vec());
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(CandlekeepError::Config("store offline".into()));
        }
        self.inner.save_batch(samples).await
    }

    async fn find(&self, series: &str, interval: &str, limit: usize) -> Result<Vec<Sample>> {
        self.finds.fetch_add(1, Ordering::SeqCst);
        if self.fail_finds.load(Ordering::SeqCst) {
            return Err(CandlekeepError::Config("store offline".into()));
        }
        if let Some(canned) = self.canned_find.lock().unwrap().clone() {
            return Ok(canned);
        }
        self.inner.find(series, interval, limit).await
    }
}

/// Store whose `save_batch` blocks until released, to observe a flush in flight.
#[derive(Default)]
pub struct GatedStore {
    pub entered: Notify,
    pub release: Notify,
    pub saved: Mutex<Vec<Vec<Sample>>>,
}

#[async_trait]
impl SampleStore for GatedStore {
    async fn save_batch(&self, samples: &[Sample]) -> Result<()> {
        self.entered.notify_one();
        self.release.notified().await;
        self.saved.lock().unwrap().push(samples.to_vec());
        Ok(())
    }

    async fn find(&self, _series: &str, _interval: &str, _limit: usize) -> Result<Vec<Sample>> {
        Ok(Vec::new())
    }
}

/// Authoritative source returning a canned response.
pub struct MockSource {
    pub response: Mutex<Result<Vec<Sample>>>,
    pub requests: Mutex<Vec<(String, String, usize)>>,
}

impl MockSource {
    pub fn returning(samples: Vec<Sample>) -> Self {
        Self {
            response: Mutex::new(Ok(samples)),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            response: Mutex::new(Err(CandlekeepError::Api {
                code: "50011".into(),
                msg: "Too Many Requests".into(),
            })),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, String, usize)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CandleSource for MockSource {
    async fn fetch_candles(
        &self,
        series: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Sample>> {
        self.requests
            .lock()
            .unwrap()
            .push((series.to_string(), interval.to_string(), limit));
        match &*self.response.lock().unwrap() {
            Ok(samples) => Ok(samples.clone()),
            Err(e) => Err(CandlekeepError::Config(e.to_string())),
        }
    }
}

/// Commands for one accepted server-side connection.
pub enum ServerCmd {
    Text(String),
    Close,
}

/// In-process WebSocket server on `127.0.0.1:0`.
///
/// Every text frame received is forwarded to `inbound` tagged with the
/// connection index. Pings are answered with `pong` unless disabled.
pub struct MockServer {
    pub url: String,
    inbound: mpsc::UnboundedReceiver<(usize, String)>,
    connections: Arc<Mutex<Vec<mpsc::UnboundedSender<ServerCmd>>>>,
    accepted: Arc<AtomicUsize>,
    answer_pings: Arc<AtomicBool>,
    reject: Arc<AtomicBool>,
    handshake_delay_ms: Arc<AtomicU64>,
}

impl MockServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock server");
        let addr = listener.local_addr().expect("Failed to read local addr");

        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let connections: Arc<Mutex<Vec<mpsc::UnboundedSender<ServerCmd>>>> =
            Arc::new(Mutex::new(Vec::new()));
        let accepted = Arc::new(AtomicUsize::new(0));
        let answer_pings = Arc::new(AtomicBool::new(true));
        let reject = Arc::new(AtomicBool::new(false));
        let handshake_delay_ms = Arc::new(AtomicU64::new(0));

        {
            let connections = connections.clone();
            let accepted = accepted.clone();
            let answer_pings = answer_pings.clone();
            let reject = reject.clone();
            let handshake_delay_ms = handshake_delay_ms.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    if reject.load(Ordering::SeqCst) {
                        drop(stream);
                        continue;
                    }
                    let delay = handshake_delay_ms.load(Ordering::SeqCst);
                    if delay > 0 {
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                    }
                    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                        continue;
                    };

                    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
                    let index = {
                        let mut conns = connections.lock().unwrap();
                        conns.push(cmd_tx);
                        conns.len() - 1
                    };
                    accepted.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve(
                        ws,
                        index,
                        cmd_rx,
                        inbound_tx.clone(),
                        answer_pings.clone(),
                    ));
                }
            });
        }

        Self {
            url: format!("ws://{addr}"),
            inbound,
            connections,
            accepted,
            answer_pings,
            reject,
            handshake_delay_ms,
        }
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn set_answer_pings(&self, answer: bool) {
        self.answer_pings.store(answer, Ordering::SeqCst);
    }

    /// Drops new TCP connections before the handshake while `true`.
    pub fn set_reject(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    /// Holds every new connection this long before answering the upgrade.
    pub fn set_handshake_delay(&self, delay: Duration) {
        self.handshake_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Sends a text frame on connection `index`.
    pub fn push(&self, index: usize, text: impl Into<String>) {
        let conns = self.connections.lock().unwrap();
        let _ = conns[index].send(ServerCmd::Text(text.into()));
    }

    /// Closes connection `index` with a close frame.
    pub fn close(&self, index: usize) {
        let conns = self.connections.lock().unwrap();
        let _ = conns[index].send(ServerCmd::Close);
    }

    /// Next non-ping text frame from any connection.
    pub async fn next_request(&mut self) -> (usize, serde_json::Value) {
        loop {
            let (index, text) = tokio::time::timeout(Duration::from_secs(5), self.inbound.recv())
                .await
                .expect("Timed out waiting for client frame")
                .expect("Mock server stopped");
            if text == "ping" {
                continue;
            }
            let value = serde_json::from_str(&text).expect("Client sent invalid JSON");
            return (index, value);
        }
    }

    /// Asserts no non-ping frame arrives within `window`.
    pub async fn expect_silence(&mut self, window: Duration) {
        let deadline = tokio::time::Instant::now() + window;
        loop {
            match tokio::time::timeout_at(deadline, self.inbound.recv()).await {
                Err(_) => return,
                Ok(Some((_, text))) if text == "ping" => continue,
                Ok(Some((_, text))) => panic!("Unexpected client frame: {text}"),
                Ok(None) => return,
            }
        }
    }
}

async fn serve(
    ws: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    index: usize,
    mut commands: mpsc::UnboundedReceiver<ServerCmd>,
    inbound: mpsc::UnboundedSender<(usize, String)>,
    answer_pings: Arc<AtomicBool>,
) {
    let (mut write, mut read) = ws.split();
    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let text = text.as_str().to_string();
                    if text == "ping" && answer_pings.load(Ordering::SeqCst) {
                        let _ = write.send(Message::Text("pong".into())).await;
                    }
                    let _ = inbound.send((index, text));
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            cmd = commands.recv() => match cmd {
                Some(ServerCmd::Text(text)) => {
                    let _ = write.send(Message::Text(text.into())).await;
                }
                Some(ServerCmd::Close) | None => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            },
        }
    }
}

/// A `ws://` URL nothing is listening on.
pub async fn dead_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to read local addr");
    drop(listener);
    format!("ws://{addr}")
}

/// Wraps a store so tests can keep a typed handle alongside the trait object.
pub fn shared<T: SampleStore + 'static>(store: T) -> (Arc<T>, Arc<dyn SampleStore>) {
    let typed = Arc::new(store);
    let dynamic: Arc<dyn SampleStore> = typed.clone();
    (typed, dynamic)
}
