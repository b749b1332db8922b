//! Orderly server shutdown and the operator console that triggers it.

use linechat_proto::surface::InputSource;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

use crate::event::ServerEvent;
use crate::relay::{RelayHandle, RelayState};

/// Tears the server down in dependency order.
///
/// 1. Raise the shutdown signal so the accept loop and readers stop.
/// 2. Wait for the accept loop, which drops the listener.
/// 3. Close the inbound queue, releasing the broadcaster.
/// 4. Close every registered connection; blocked readers wake with EOF.
/// 5. Wait for every tracked task, then report completion.
pub(crate) async fn run(state: &RelayState, accept_task: JoinHandle<()>, tasks: &TaskTracker) {
    tracing::info!("shutting down");
    state.shutdown_signal().cancel();

    if let Err(e) = accept_task.await {
        tracing::warn!(error = %e, "accept loop ended abnormally");
    }

    state.inbound.close();

    let remaining = state.registry.drain();
    let count = remaining.len();
    for conn in remaining {
        conn.close().await;
    }
    tracing::debug!(count, "closed remaining connections");

    tasks.close();
    tasks.wait().await;

    tracing::info!("shutdown complete");
    state.emit(ServerEvent::ShutdownComplete);
}

/// Watches operator input for the shutdown keyword.
#[derive(Clone)]
pub struct ShutdownController {
    handle: RelayHandle,
    keyword: String,
}

impl ShutdownController {
    /// Creates a controller that stops `handle` when `keyword` is entered.
    #[must_use]
    pub fn new(handle: RelayHandle, keyword: impl Into<String>) -> Self {
        Self {
            handle,
            keyword: keyword.into(),
        }
    }

    /// Whether `line` is the shutdown command. Exact, case-sensitive match.
    #[must_use]
    pub fn is_shutdown_command(&self, line: &str) -> bool {
        line == self.keyword
    }

    /// Reads operator lines until the keyword arrives, then shuts down.
    ///
    /// Returns `true` if this watcher performed the shutdown. Returns
    /// `false` if the server stopped for another reason or the input ran
    /// dry; the server keeps running in the latter case.
    pub async fn watch<I: InputSource>(self, mut input: I) -> bool {
        let signal = self.handle.shutdown_signal();
        loop {
            let line = tokio::select! {
                () = signal.cancelled() => return false,
                line = input.next_line() => line,
            };

            match line {
                Some(line) if self.is_shutdown_command(&line) => {
                    tracing::info!("shutdown requested from console");
                    self.handle.shutdown().await;
                    return true;
                }
                Some(line) => {
                    tracing::info!(%line, "ignoring console input");
                }
                None => {
                    tracing::info!("console input closed; use Ctrl-C to stop");
                    return false;
                }
            }
        }
    }
}
