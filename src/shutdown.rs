//! Cooperative shutdown signal shared by the background tasks.

use tokio::sync::watch;

/// Creates the signal pair. Send `true` to stop every task holding a receiver.
#[must_use]
pub fn channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Resolves once `true` has been sent.
///
/// A dropped sender never resolves; tasks then run until aborted.
pub async fn requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
