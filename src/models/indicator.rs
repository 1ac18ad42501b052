//! Indicator kinds whose results downstream consumers memoize in the result
//! cache. The formulas themselves live outside this crate.

use serde::{Deserialize, Serialize};

/// The closed set of computations that share the result cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IndicatorKind {
    Rsi,
    Boll,
    Macd,
    Pinbar,
}

impl IndicatorKind {
    /// Name used in cache keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            IndicatorKind::Rsi => "RSI",
            IndicatorKind::Boll => "BOLL",
            IndicatorKind::Macd => "MACD",
            IndicatorKind::Pinbar => "PINBAR",
        }
    }
}
