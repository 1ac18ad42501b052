//! Application configuration loaded from environment variables.
//!
//! Every value has a default, so an empty environment yields a working
//! configuration against the public OKX endpoints. Empty variables are
//! treated as absent; malformed numbers or booleans are rejected.
//!
//! - `OKX_WEBSOCKET_URL`, `OKX_REST_URL`, `OKX_REST_TIMEOUT_MS`
//! - `CANDLEKEEP_RECONNECT_INITIAL_MS`, `CANDLEKEEP_RECONNECT_MAX_ATTEMPTS`
//! - `CANDLEKEEP_HEARTBEAT_INTERVAL_MS`, `CANDLEKEEP_HEARTBEAT_TIMEOUT_MS`
//! - `CANDLEKEEP_FLUSH_INTERVAL_SECS`, `CANDLEKEEP_SHUTDOWN_GRACE_MS`
//! - `CANDLEKEEP_DB_PATH`, `CANDLEKEEP_REDIS_URL`, `CANDLEKEEP_CACHE_ENABLED`
//! - `CANDLEKEEP_INTEGRITY_ENABLED`, `CANDLEKEEP_INTEGRITY_STRICT`,
//!   `CANDLEKEEP_INTEGRITY_FETCH_LIMIT`, `CANDLEKEEP_CACHE_TTL_SECS`
//! - `CANDLEKEEP_SUBSCRIPTIONS_FILE`, `CANDLEKEEP_SYMBOLS`,
//!   `CANDLEKEEP_INTERVALS`, `CANDLEKEEP_REFRESH_INTERVAL_MS`

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::models::SubscriptionMatrix;

/// Default public business WebSocket endpoint (candle channels live here).
const DEFAULT_WEBSOCKET_URL: &str = "wss://ws.okx.com:8443/ws/v5/business";

/// Default REST base URL.
const DEFAULT_REST_URL: &str = "https://www.okx.com/api/v5";

const DEFAULT_SYMBOLS: &str = "BTC-USDT-SWAP";
const DEFAULT_INTERVALS: &str = "1m,1H";

/// Top-level application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub okx: OkxConfig,
    pub connection: ConnectionConfig,
    pub batch: BatchConfig,
    pub store: StoreConfig,
    pub cache: CacheConfig,
    pub integrity: IntegrityConfig,
    pub subscription: SubscriptionSettings,
}

/// Exchange endpoints.
#[derive(Debug, Clone)]
pub struct OkxConfig {
    pub websocket_url: String,
    pub rest_url: String,
    pub rest_timeout: Duration,
}

/// Push-channel session tuning.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub url: String,
    /// Backoff unit, multiplied by the Fibonacci number of the attempt.
    pub initial_reconnect_interval: Duration,
    /// Attempts allowed before the manager gives up; 0 disables reconnects.
    pub max_reconnect_attempts: u32,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
}

impl ConnectionConfig {
    /// Production defaults for the given URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            initial_reconnect_interval: Duration::from_millis(1000),
            max_reconnect_attempts: 10,
            heartbeat_interval: Duration::from_millis(30_000),
            heartbeat_timeout: Duration::from_millis(60_000),
        }
    }
}

/// Batch writer timing.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub flush_interval: Duration,
    /// Upper bound on the final flush during shutdown.
    pub shutdown_grace: Duration,
}

/// Durable store location.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub db_path: PathBuf,
}

/// Result cache backend selection.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Redis URL; `None` selects the in-process cache.
    pub redis_url: Option<String>,
}

/// Integrity gate policy.
#[derive(Debug, Clone)]
pub struct IntegrityConfig {
    pub enabled: bool,
    pub strict: bool,
    /// Upper bound on samples requested from the REST API during backfill.
    pub fetch_limit: usize,
    /// TTL for validated reads; 0 disables caching.
    pub cache_ttl_secs: u64,
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strict: false,
            fetch_limit: 300,
            cache_ttl_secs: 0,
        }
    }
}

/// Where the desired subscription matrix comes from.
#[derive(Debug, Clone)]
pub struct SubscriptionSettings {
    pub file: PathBuf,
    /// Used when the file does not exist.
    pub fallback: SubscriptionMatrix,
    pub refresh_interval: Duration,
}

/// Loads the application configuration from environment variables.
///
/// # Errors
///
/// Returns [`CandlekeepError::Config`](crate::CandlekeepError::Config) if a
/// numeric or boolean variable cannot be parsed.
pub fn fetch_config() -> crate::Result<AppConfig> {
    let websocket_url = string_var("OKX_WEBSOCKET_URL", DEFAULT_WEBSOCKET_URL);

    let okx = OkxConfig {
        websocket_url: websocket_url.clone(),
        rest_url: string_var("OKX_REST_URL", DEFAULT_REST_URL),
        rest_timeout: Duration::from_millis(parse_var("OKX_REST_TIMEOUT_MS", 10_000)?),
    };

    let connection = ConnectionConfig {
        url: websocket_url,
        initial_reconnect_interval: Duration::from_millis(parse_var(
            "CANDLEKEEP_RECONNECT_INITIAL_MS",
            1000,
        )?),
        max_reconnect_attempts: parse_var("CANDLEKEEP_RECONNECT_MAX_ATTEMPTS", 10)?,
        heartbeat_interval: Duration::from_millis(parse_var(
            "CANDLEKEEP_HEARTBEAT_INTERVAL_MS",
            30_000,
        )?),
        heartbeat_timeout: Duration::from_millis(parse_var(
            "CANDLEKEEP_HEARTBEAT_TIMEOUT_MS",
            60_000,
        )?),
    };

    let batch = BatchConfig {
        flush_interval: Duration::from_secs(parse_var("CANDLEKEEP_FLUSH_INTERVAL_SECS", 20)?),
        shutdown_grace: Duration::from_millis(parse_var("CANDLEKEEP_SHUTDOWN_GRACE_MS", 5000)?),
    };

    let store = StoreConfig {
        db_path: PathBuf::from(string_var("CANDLEKEEP_DB_PATH", "candles.db")),
    };

    let cache = CacheConfig {
        enabled: bool_var("CANDLEKEEP_CACHE_ENABLED", true)?,
        redis_url: non_empty_var("CANDLEKEEP_REDIS_URL"),
    };

    let integrity = IntegrityConfig {
        enabled: bool_var("CANDLEKEEP_INTEGRITY_ENABLED", true)?,
        strict: bool_var("CANDLEKEEP_INTEGRITY_STRICT", false)?,
        fetch_limit: parse_var("CANDLEKEEP_INTEGRITY_FETCH_LIMIT", 300)?,
        cache_ttl_secs: parse_var("CANDLEKEEP_CACHE_TTL_SECS", 0)?,
    };

    let subscription = SubscriptionSettings {
        file: PathBuf::from(string_var(
            "CANDLEKEEP_SUBSCRIPTIONS_FILE",
            "subscriptions.json",
        )),
        fallback: SubscriptionMatrix::new(
            split_list(&string_var("CANDLEKEEP_SYMBOLS", DEFAULT_SYMBOLS)),
            split_list(&string_var("CANDLEKEEP_INTERVALS", DEFAULT_INTERVALS)),
        ),
        refresh_interval: Duration::from_millis(parse_var(
            "CANDLEKEEP_REFRESH_INTERVAL_MS",
            60_000,
        )?),
    };

    Ok(AppConfig {
        okx,
        connection,
        batch,
        store,
        cache,
        integrity,
        subscription,
    })
}

/// Returns the value of an environment variable if it exists and is non-empty.
fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn string_var(name: &str, default: &str) -> String {
    non_empty_var(name).unwrap_or_else(|| default.to_string())
}

fn parse_var<T: FromStr>(name: &str, default: T) -> crate::Result<T> {
    match non_empty_var(name) {
        Some(raw) => raw.trim().parse().map_err(|_| {
            crate::CandlekeepError::Config(format!("{name} has invalid value {raw:?}"))
        }),
        None => Ok(default),
    }
}

fn bool_var(name: &str, default: bool) -> crate::Result<bool> {
    match non_empty_var(name) {
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(crate::CandlekeepError::Config(format!(
                "{name} has invalid value {raw:?}"
            ))),
        },
        None => Ok(default),
    }
}

/// Splits a comma-separated list, dropping blanks.
fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
