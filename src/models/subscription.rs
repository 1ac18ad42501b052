//! Subscription matrix and the minimal diff between two matrices.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::{CANDLE_CHANNEL_PREFIX, ChannelArg};

/// The cross product of a set of series and a set of intervals that the
/// push channel should currently be delivering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionMatrix {
    #[serde(alias = "symbols")]
    pub series: Vec<String>,
    #[serde(default)]
    pub intervals: Vec<String>,
}

impl SubscriptionMatrix {
    #[must_use]
    pub fn new(series: Vec<String>, intervals: Vec<String>) -> Self {
        Self { series, intervals }
    }

    /// Expands the matrix into its `(series, interval)` pairs.
    #[must_use]
    pub fn pairs(&self) -> BTreeSet<SubscriptionPair> {
        self.series
            .iter()
            .flat_map(|series| {
                self.intervals.iter().map(move |interval| SubscriptionPair {
                    series: series.clone(),
                    interval: interval.clone(),
                })
            })
            .collect()
    }

    /// Returns `true` if the matrix expands to no pairs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.series.is_empty() || self.intervals.is_empty()
    }
}

/// One `(series, interval)` cell of a [`SubscriptionMatrix`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionPair {
    pub series: String,
    pub interval: String,
}

impl SubscriptionPair {
    #[must_use]
    pub fn new(series: impl Into<String>, interval: impl Into<String>) -> Self {
        Self {
            series: series.into(),
            interval: interval.into(),
        }
    }

    /// Wire-format argument, e.g. `{"channel":"candle1m","instId":"BTC-USDT"}`.
    #[must_use]
    pub fn to_arg(&self) -> ChannelArg {
        ChannelArg {
            channel: format!("{CANDLE_CHANNEL_PREFIX}{}", self.interval),
            inst_id: self.series.clone(),
        }
    }
}

/// Subscribe/unsubscribe sets needed to move from one matrix to another.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionDiff {
    pub unsubscribe: BTreeSet<SubscriptionPair>,
    pub subscribe: BTreeSet<SubscriptionPair>,
}

impl SubscriptionDiff {
    /// Computes `previous - desired` and `desired - previous`.
    ///
    /// With no previous matrix everything in `desired` is subscribed.
    #[must_use]
    pub fn between(previous: Option<&SubscriptionMatrix>, desired: &SubscriptionMatrix) -> Self {
        let new_pairs = desired.pairs();
        let Some(previous) = previous else {
            return Self {
                unsubscribe: BTreeSet::new(),
                subscribe: new_pairs,
            };
        };
        let old_pairs = previous.pairs();

        Self {
            unsubscribe: old_pairs.difference(&new_pairs).cloned().collect(),
            subscribe: new_pairs.difference(&old_pairs).cloned().collect(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.unsubscribe.is_empty() && self.subscribe.is_empty()
    }
}
