//! Shared models for the OKX v5 candle channels and REST API.
//!
//! Contains the normalized [`Sample`], the wire-format request/response
//! types, the subscription matrix, and the interval gap table used by the
//! integrity checks.

pub mod candle;
pub mod indicator;
pub mod subscription;

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

pub use candle::{CandlePushFrame, CandlesResponse, Sample, SampleKey};
pub use indicator::IndicatorKind;
pub use subscription::{SubscriptionDiff, SubscriptionMatrix, SubscriptionPair};

/// Channel-name prefix of the candle channels (`candle1m`, `candle1H`, ...).
pub const CANDLE_CHANNEL_PREFIX: &str = "candle";

/// Text frame sent as an application-level keepalive.
pub const PING: &str = "ping";

/// Text frame the server answers a [`PING`] with.
pub const PONG: &str = "pong";

/// Expected spacing between consecutive samples, in seconds.
///
/// Only the intervals the service actually subscribes to are listed;
/// anything else is treated as continuous by the integrity checks.
#[must_use]
pub fn expected_gap_secs(interval: &str) -> Option<i64> {
    match interval {
        "1m" => Some(60),
        "1H" => Some(3600),
        _ => None,
    }
}

/// Operation of an outbound control frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    Subscribe,
    Unsubscribe,
}

impl Op {
    pub fn as_str(&self) -> &'static str {
        match self {
            Op::Subscribe => "subscribe",
            Op::Unsubscribe => "unsubscribe",
        }
    }
}

/// Channel argument shared by control frames and data frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelArg {
    pub channel: String,
    #[serde(rename = "instId")]
    pub inst_id: String,
}

/// A batched `subscribe` / `unsubscribe` control frame.
#[derive(Debug, Clone, Serialize)]
pub struct OpRequest {
    pub op: Op,
    pub args: Vec<ChannelArg>,
}

impl OpRequest {
    #[must_use]
    pub fn new<'a>(op: Op, pairs: impl IntoIterator<Item = &'a SubscriptionPair>) -> Self {
        Self {
            op,
            args: pairs.into_iter().map(SubscriptionPair::to_arg).collect(),
        }
    }
}

/// Acknowledgement or error event, e.g. `{"event":"subscribe","arg":{..}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct EventResponse {
    pub event: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub arg: Option<ChannelArg>,
}

/// Current wall-clock time in epoch milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
