//! OKX candle ingestion with an integrity-checked read path.
//!
//! Keeps one push-channel session subscribed to a matrix of candle channels,
//! deduplicates the stream into periodic batch writes, and serves historical
//! windows that are checked for completeness and continuity (and optionally
//! backfilled from the REST API) before they are returned.

pub mod cache;
pub mod config;
pub mod error;
pub mod integrity;
pub mod metrics;
pub mod models;
pub mod rest;
pub mod service;
pub mod shutdown;
pub mod store;
pub mod subscription;
pub mod websocket;
pub mod writer;

pub use error::{CandlekeepError, Result};
