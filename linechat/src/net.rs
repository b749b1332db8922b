//! Connecting to the relay server and running a chat session.
//!
//! [`connect`] opens the TCP connection; [`run`] does that, reports the
//! outcome to the sink, and then runs a [`ClientDuplex`] until the session
//! ends.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use linechat_proto::connection::{Connection, ConnectionError, LineReader};
use linechat_proto::surface::{EventSink, InputSource};
use tokio::net::TcpStream;

use crate::config::ClientConfig;
use crate::duplex::ClientDuplex;

/// Sink type the client reports to.
pub type ClientSink = Arc<dyn EventSink<ClientEvent>>;

/// Something the user should see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The connection to the server is open.
    Connected {
        /// Server endpoint.
        addr: SocketAddr,
    },
    /// A line broadcast by the server.
    Message(String),
    /// The server could not be reached.
    ConnectFailed {
        /// `host:port` that was attempted.
        target: String,
        /// Why the attempt failed.
        reason: String,
    },
    /// The server went away mid-session.
    LostConnection,
}

impl fmt::Display for ClientEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected { addr } => write!(f, "Connected to server at {addr}"),
            Self::Message(line) => f.write_str(line),
            Self::ConnectFailed { target, reason } => {
                write!(f, "Could not connect to server at {target}: {reason}")
            }
            Self::LostConnection => f.write_str("Lost connection to server"),
        }
    }
}

/// Errors establishing a session.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The TCP connection failed (refused, unreachable, unresolvable).
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        /// `host:port` that was attempted.
        addr: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The server did not accept the connection in time.
    #[error("timed out connecting to {addr} after {after:?}")]
    Timeout {
        /// `host:port` that was attempted.
        addr: String,
        /// Configured connect timeout.
        after: Duration,
    },

    /// The socket opened but could not be prepared for line I/O.
    #[error("connection setup failed: {0}")]
    Setup(#[from] ConnectionError),
}

impl ClientError {
    /// Short cause, without the target address.
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::Connect { source, .. } => source.to_string(),
            Self::Timeout { after, .. } => format!("timed out after {after:?}"),
            Self::Setup(e) => e.to_string(),
        }
    }
}

/// Opens a connection to the configured server.
///
/// # Errors
///
/// Returns [`ClientError::Connect`] if the server is unreachable and
/// [`ClientError::Timeout`] if it does not answer within
/// `config.connect_timeout`.
pub async fn connect(config: &ClientConfig) -> Result<(Arc<Connection>, LineReader), ClientError> {
    let addr = config.server_addr();
    tracing::info!(%addr, "connecting to server");

    let stream = match tokio::time::timeout(config.connect_timeout, TcpStream::connect(&addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(source)) => return Err(ClientError::Connect { addr, source }),
        Err(_) => {
            return Err(ClientError::Timeout {
                addr,
                after: config.connect_timeout,
            });
        }
    };

    Ok(Connection::wrap(stream, config.connection_limits())?)
}

/// Runs one chat session: connect, then relay lines both ways until either
/// side ends it.
///
/// Emits [`ClientEvent::ConnectFailed`] and returns the error if the server
/// cannot be reached; otherwise emits [`ClientEvent::Connected`] and returns
/// once the session is over.
///
/// # Errors
///
/// Returns [`ClientError`] if the connection cannot be established.
pub async fn run<I>(config: &ClientConfig, input: I, sink: ClientSink) -> Result<(), ClientError>
where
    I: InputSource + 'static,
{
    let (conn, reader) = match connect(config).await {
        Ok(pair) => pair,
        Err(e) => {
            tracing::warn!(error = %e, "connection failed");
            sink.emit(ClientEvent::ConnectFailed {
                target: config.server_addr(),
                reason: e.reason(),
            });
            return Err(e);
        }
    };

    tracing::info!(addr = %conn.peer_addr(), "connected");
    sink.emit(ClientEvent::Connected {
        addr: conn.peer_addr(),
    });

    ClientDuplex::start(conn, reader, input, sink).join().await;
    tracing::info!("session ended");
    Ok(())
}
