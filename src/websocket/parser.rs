//! Translation of candle push frames into [`Sample`]s.

use tracing::debug;

use crate::models::{CANDLE_CHANNEL_PREFIX, CandlePushFrame, Sample};

/// Parses one push-channel text frame.
///
/// Returns `None` for anything that is not a candle data frame: acks, error
/// events, other channels, malformed JSON, or a first row that is too short.
/// Only the first row of `data` is used; the exchange sends one per frame.
#[must_use]
pub fn parse_candle(text: &str) -> Option<Sample> {
    let frame: CandlePushFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(error = %e, "Frame is not a candle push");
            return None;
        }
    };

    let interval = frame.arg.channel.strip_prefix(CANDLE_CHANNEL_PREFIX)?;
    if interval.is_empty() || frame.arg.inst_id.is_empty() {
        return None;
    }

    let row = frame.data.first()?.as_array()?;
    Sample::from_row(&frame.arg.inst_id, interval, row)
}
