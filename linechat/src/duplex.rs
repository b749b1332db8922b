//! Full-duplex session over one server connection.
//!
//! Two tasks share the connection: the reader forwards every server line to
//! the sink, the writer forwards every input line to the server. Whichever
//! side notices the end first closes the connection, which stops the other.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use linechat_proto::connection::{Connection, LineReader};
use linechat_proto::surface::InputSource;
use tokio::task::JoinHandle;

use crate::net::{ClientEvent, ClientSink};

/// A running client session.
pub struct ClientDuplex {
    conn: Arc<Connection>,
    connected: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl ClientDuplex {
    /// Spawns the reader and writer tasks for an open connection.
    pub fn start<I>(conn: Arc<Connection>, reader: LineReader, input: I, sink: ClientSink) -> Self
    where
        I: InputSource + 'static,
    {
        let connected = Arc::new(AtomicBool::new(true));

        let reader = tokio::spawn(read_loop(
            Arc::clone(&conn),
            reader,
            Arc::clone(&connected),
            Arc::clone(&sink),
        ));
        let writer = tokio::spawn(write_loop(
            Arc::clone(&conn),
            input,
            Arc::clone(&connected),
            sink,
        ));

        Self {
            conn,
            connected,
            reader,
            writer,
        }
    }

    /// Whether the session is still live.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// The underlying connection.
    #[must_use]
    pub const fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    /// Ends the session from the local side without reporting a lost
    /// connection.
    pub async fn close(&self) {
        self.connected.store(false, Ordering::Relaxed);
        self.conn.close().await;
    }

    /// Waits for both tasks to finish.
    pub async fn join(self) {
        for (name, task) in [("reader", self.reader), ("writer", self.writer)] {
            if let Err(e) = task.await {
                tracing::warn!(task = name, error = %e, "session task failed");
            }
        }
    }
}

/// Marks the session dead and reports it, unless something already did.
async fn lose_connection(conn: &Connection, connected: &AtomicBool, sink: &ClientSink) {
    connected.store(false, Ordering::Relaxed);
    if conn.close().await {
        tracing::info!("lost connection to server");
        sink.emit(ClientEvent::LostConnection);
    }
}

/// Forwards server lines to the sink until the stream ends.
async fn read_loop(
    conn: Arc<Connection>,
    mut reader: LineReader,
    connected: Arc<AtomicBool>,
    sink: ClientSink,
) {
    loop {
        match reader.read_line().await {
            Ok(Some(line)) => sink.emit(ClientEvent::Message(line)),
            Ok(None) => {
                tracing::debug!("server stream ended");
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "read from server failed");
                break;
            }
        }
    }
    lose_connection(&conn, &connected, &sink).await;
}

/// Forwards input lines to the server while the session is connected.
async fn write_loop<I: InputSource>(
    conn: Arc<Connection>,
    mut input: I,
    connected: Arc<AtomicBool>,
    sink: ClientSink,
) {
    loop {
        let line = tokio::select! {
            () = conn.closed() => break,
            line = input.next_line() => line,
        };

        let Some(line) = line else {
            tracing::info!("input closed, leaving");
            connected.store(false, Ordering::Relaxed);
            conn.close().await;
            break;
        };

        if !connected.load(Ordering::Relaxed) {
            tracing::debug!("session over, dropping input line");
            break;
        }

        match conn.write_line(&line).await {
            Ok(()) => {}
            Err(e) if !e.is_disconnect() => {
                tracing::warn!(error = %e, "not sending invalid line");
            }
            Err(e) => {
                tracing::warn!(error = %e, "send to server failed");
                lose_connection(&conn, &connected, &sink).await;
                break;
            }
        }
    }
}
