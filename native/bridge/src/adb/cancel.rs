//! Races blocking transport calls against caller cancellation.
//!
//! The transport has no way to abort a call in flight. Cancelling only stops
//! the caller from waiting; the call keeps running on its blocking thread and
//! its result is dropped.

use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, trace};

use crate::error::{BridgeError, BridgeResult};

/// Runs `call` on the blocking pool and waits for it unless `token` fires first.
pub(crate) async fn run_blocking<T, F>(
    token: &CancellationToken,
    operation: &'static str,
    call: F,
) -> BridgeResult<T>
where
    F: FnOnce() -> BridgeResult<T> + Send + 'static,
    T: Send + 'static,
{
    if token.is_cancelled() {
        trace!(operation, "Token already cancelled, not dispatching");
        return Err(BridgeError::Cancelled);
    }

    let (result_tx, result_rx) = oneshot::channel();
    let span = Span::current();
    tokio::task::spawn_blocking(move || {
        let _entered = span.entered();
        // The receiver is gone if the caller stopped waiting
        let _ = result_tx.send(call());
    });

    tokio::select! {
        biased;
        _ = token.cancelled() => {
            debug!(operation, "Cancelled while waiting for the transport, abandoning call");
            Err(BridgeError::Cancelled)
        }
        result = result_rx => result.unwrap_or(Err(BridgeError::WorkerLost { operation })),
    }
}

/// Returns a child of `parent` that is also cancelled once `timeout` elapses.
pub fn cancel_after(parent: &CancellationToken, timeout: Duration) -> CancellationToken {
    let token = parent.child_token();
    tokio::spawn({
        let token = token.clone();
        async move {
            if token.run_until_cancelled(tokio::time::sleep(timeout)).await.is_some() {
                debug!(?timeout, "Deadline reached, cancelling");
                token.cancel();
            }
        }
    });
    token
}
