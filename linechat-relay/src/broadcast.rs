//! Broadcast loop: drains the inbound queue and fans each line out.

use std::sync::Arc;

use crate::relay::RelayState;

/// Delivers queued lines to every registered connection until the queue
/// closes.
///
/// Lines go out one at a time, so every recipient sees the same order. The
/// sender is a recipient too.
pub(crate) async fn run(state: Arc<RelayState>) {
    while let Some(line) = state.inbound.pop().await {
        deliver(&state, &line).await;
    }
    tracing::debug!("broadcast loop stopped");
}

/// Writes `line` to a snapshot of the registry.
///
/// A failed write drops that recipient and moves on to the next one.
/// Returns the number of successful deliveries.
pub(crate) async fn deliver(state: &RelayState, line: &str) -> usize {
    let recipients = state.registry.snapshot();
    let mut delivered = 0;

    for conn in recipients {
        match conn.write_line(line).await {
            Ok(()) => delivered += 1,
            Err(e) => {
                if state.is_stopping() || conn.is_closed() {
                    tracing::debug!(conn_id = %conn.id(), error = %e, "skipped closed recipient");
                } else {
                    tracing::warn!(conn_id = %conn.id(), error = %e, "delivery failed, dropping client");
                }
                state.disconnect(&conn).await;
            }
        }
    }

    delivered
}
