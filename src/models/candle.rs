//! OHLCV candle models.
//!
//! Both the push channel and the REST API encode a candle as a nine-element
//! array of strings: `[ts, o, h, l, c, vol, volCcy, volCcyQuote, confirm]`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::{ChannelArg, now_millis};

/// Number of fields in a candle row.
pub const CANDLE_ROW_LEN: usize = 9;

/// One OHLCV record for a series at one interval boundary.
///
/// Price relationships (`high >= low` etc.) are the exchange's business and
/// are passed through unchecked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub series: String,
    pub interval: String,
    /// Start of the interval, epoch milliseconds as assigned by the exchange.
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// `true` once the interval has closed and the values are final.
    pub confirmed: bool,
    /// Local wall-clock time the sample was built, epoch milliseconds.
    pub ingested_at: i64,
}

impl Sample {
    /// Builds a sample from a candle row.
    ///
    /// Returns `None` if the row has fewer than [`CANDLE_ROW_LEN`] elements.
    /// Individual numeric tokens that fail to parse become `0`.
    #[must_use]
    pub fn from_row(series: &str, interval: &str, row: &[Value]) -> Option<Self> {
        if row.len() < CANDLE_ROW_LEN {
            return None;
        }

        Some(Self {
            series: series.to_string(),
            interval: interval.to_string(),
            timestamp: parse_millis(&row[0]),
            open: parse_number(&row[1]),
            high: parse_number(&row[2]),
            low: parse_number(&row[3]),
            close: parse_number(&row[4]),
            volume: parse_number(&row[5]),
            confirmed: parse_confirm(&row[8]),
            ingested_at: now_millis(),
        })
    }

    /// Deduplication key of this sample.
    #[must_use]
    pub fn key(&self) -> SampleKey {
        SampleKey {
            series: self.series.clone(),
            interval: self.interval.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// Uniqueness key of a sample: `(series, interval, timestamp)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SampleKey {
    pub series: String,
    pub interval: String,
    pub timestamp: i64,
}

impl std::fmt::Display for SampleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.series, self.interval, self.timestamp)
    }
}

/// A push-channel data frame, e.g. on `candle1m`.
#[derive(Debug, Clone, Deserialize)]
pub struct CandlePushFrame {
    pub arg: ChannelArg,
    #[serde(default)]
    pub data: Vec<Value>,
}

/// Body of `GET /market/candles`. Rows arrive newest first.
#[derive(Debug, Clone, Deserialize)]
pub struct CandlesResponse {
    pub code: String,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub data: Vec<Value>,
}

fn parse_number(value: &Value) -> f64 {
    match value {
        Value::String(s) => s.trim().parse().unwrap_or_else(|_| {
            warn!(token = %s, "Unparseable numeric token, using 0");
            0.0
        }),
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn parse_millis(value: &Value) -> i64 {
    match value {
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
                .unwrap_or_else(|| {
                    warn!(token = %s, "Unparseable timestamp token, using 0");
                    0
                })
        }
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        _ => 0,
    }
}

fn parse_confirm(value: &Value) -> bool {
    match value {
        Value::String(s) => s.trim() == "1",
        Value::Number(n) => n.as_i64() == Some(1),
        Value::Bool(b) => *b,
        _ => false,
    }
}
