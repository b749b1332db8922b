//! Input and output surfaces shared by the server and client programs.
//!
//! The relay engine and the client duplex never touch a terminal directly.
//! They pull text from an [`InputSource`] and push events to an
//! [`EventSink`]. The binaries plug in [`StdinSource`] and [`StdoutSink`];
//! tests and embedders use the channel implementations.

use std::fmt::Display;
use std::io::{BufRead, Write};

use tokio::sync::mpsc;

/// Channel capacity between the stdin thread and its consumer.
const STDIN_CHANNEL_CAPACITY: usize = 64;

/// Produces text lines, one at a time.
pub trait InputSource: Send {
    /// Waits for the next line. Returns `None` once the source is exhausted.
    fn next_line(&mut self) -> impl std::future::Future<Output = Option<String>> + Send;
}

/// Consumes discrete events for display.
///
/// Implementations must not block: events are emitted from the relay's
/// reader and broadcast tasks.
pub trait EventSink<E>: Send + Sync {
    /// Delivers one event.
    fn emit(&self, event: E);
}

impl InputSource for mpsc::Receiver<String> {
    async fn next_line(&mut self) -> Option<String> {
        self.recv().await
    }
}

impl InputSource for mpsc::UnboundedReceiver<String> {
    async fn next_line(&mut self) -> Option<String> {
        self.recv().await
    }
}

impl<E: Send> EventSink<E> for mpsc::UnboundedSender<E> {
    fn emit(&self, event: E) {
        // A dropped receiver means nobody is watching; that is not an error.
        let _ = self.send(event);
    }
}

/// Writes each event's `Display` form to stdout, one per line.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl<E: Display> EventSink<E> for StdoutSink {
    fn emit(&self, event: E) {
        let mut out = std::io::stdout().lock();
        if writeln!(out, "{event}").and_then(|()| out.flush()).is_err() {
            tracing::debug!("stdout closed, dropping event");
        }
    }
}

/// Reads lines from the process's standard input.
///
/// A dedicated OS thread performs the blocking reads and forwards lines over
/// a channel, so an idle terminal never holds up runtime shutdown.
#[derive(Debug)]
pub struct StdinSource {
    lines: mpsc::Receiver<String>,
}

impl StdinSource {
    /// Starts the stdin reader thread.
    #[must_use]
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel(STDIN_CHANNEL_CAPACITY);
        let spawned = std::thread::Builder::new()
            .name("stdin-reader".to_string())
            .spawn(move || {
                for line in std::io::stdin().lock().lines() {
                    match line {
                        Ok(line) => {
                            if tx.blocking_send(line).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "stdin read failed");
                            break;
                        }
                    }
                }
                tracing::debug!("stdin reader thread exiting");
            });
        if let Err(e) = spawned {
            // The sender was moved into the failed closure and dropped, so
            // the source simply reports exhaustion.
            tracing::error!(error = %e, "failed to spawn stdin reader thread");
        }
        Self { lines: rx }
    }
}

impl InputSource for StdinSource {
    async fn next_line(&mut self) -> Option<String> {
        self.lines.recv().await
    }
}
