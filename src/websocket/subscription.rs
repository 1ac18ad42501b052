//! Candle channel subscribe and unsubscribe operations.
//!
//! Each call sends a single batched control frame covering every pair given.

use futures_util::SinkExt;
use tracing::{debug, info};
use tungstenite::Message;

use super::WsWriter;
use crate::Result;
use crate::models::{Op, OpRequest, SubscriptionPair};

/// Subscribes to the candle channels of all `pairs` in one frame.
///
/// Sends nothing when `pairs` is empty.
///
/// # Errors
///
/// Returns a [`CandlekeepError`](crate::CandlekeepError) if sending the frame fails.
pub async fn subscribe<'a, I>(write: &mut WsWriter, pairs: I) -> Result<usize>
where
    I: IntoIterator<Item = &'a SubscriptionPair>,
{
    send_op(write, Op::Subscribe, pairs).await
}

/// Unsubscribes from the candle channels of all `pairs` in one frame.
///
/// Sends nothing when `pairs` is empty.
///
/// # Errors
///
/// Returns a [`CandlekeepError`](crate::CandlekeepError) if sending the frame fails.
pub async fn unsubscribe<'a, I>(write: &mut WsWriter, pairs: I) -> Result<usize>
where
    I: IntoIterator<Item = &'a SubscriptionPair>,
{
    send_op(write, Op::Unsubscribe, pairs).await
}

async fn send_op<'a, I>(write: &mut WsWriter, op: Op, pairs: I) -> Result<usize>
where
    I: IntoIterator<Item = &'a SubscriptionPair>,
{
    let request = OpRequest::new(op, pairs);
    if request.args.is_empty() {
        return Ok(0);
    }

    let json = serde_json::to_string(&request)?;
    debug!("Sending {} request: {}", op.as_str(), json);
    write.send(Message::Text(json.into())).await?;
    info!(op = op.as_str(), count = request.args.len(), "Sent candle channel request");

    Ok(request.args.len())
}
