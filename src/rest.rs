//! OKX REST client used as the authoritative source for backfill.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::models::{CandlesResponse, Sample};
use crate::{CandlekeepError, Result};

/// Largest `limit` the candles endpoint accepts.
pub const MAX_FETCH_LIMIT: usize = 300;

/// Source of authoritative historical samples.
#[async_trait]
pub trait CandleSource: Send + Sync {
    /// Fetches up to `limit` of the most recent samples, oldest first.
    async fn fetch_candles(&self, series: &str, interval: &str, limit: usize)
    -> Result<Vec<Sample>>;
}

/// Client for `GET /market/candles`.
#[derive(Debug, Clone)]
pub struct OkxRestClient {
    client: reqwest::Client,
    base_url: String,
}

impl OkxRestClient {
    /// Creates a client for `base_url` (e.g. `https://www.okx.com/api/v5`).
    ///
    /// # Errors
    ///
    /// Returns [`CandlekeepError::Http`] if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl CandleSource for OkxRestClient {
    async fn fetch_candles(
        &self,
        series: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Sample>> {
        let limit = if limit > MAX_FETCH_LIMIT {
            warn!(limit, max = MAX_FETCH_LIMIT, "Clamping candle request limit");
            MAX_FETCH_LIMIT
        } else {
            limit
        };

        let url = format!("{}/market/candles", self.base_url);
        let limit_param = limit.to_string();
        let response = self
            .client
            .get(&url)
            .query(&[
                ("instId", series),
                ("bar", interval),
                ("limit", limit_param.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CandlekeepError::Api {
                code: status.as_u16().to_string(),
                msg: status.canonical_reason().unwrap_or("HTTP error").to_string(),
            });
        }

        let body: CandlesResponse = response.json().await?;
        if body.code != "0" {
            return Err(CandlekeepError::Api {
                code: body.code,
                msg: body.msg,
            });
        }

        // Rows arrive newest first.
        let mut samples: Vec<Sample> = body
            .data
            .iter()
            .filter_map(|row| Sample::from_row(series, interval, row.as_array()?))
            .collect();
        samples.reverse();
        debug!(series, interval, count = samples.len(), "Fetched candles");

        Ok(samples)
    }
}
