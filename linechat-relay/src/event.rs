//! Operator-facing events emitted by the relay server.

use std::fmt;
use std::net::SocketAddr;

use linechat_proto::connection::ConnectionId;

/// Something the operator should see, delivered to the server's output sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// The listening socket is bound and accepting.
    Listening {
        /// Bound address.
        addr: SocketAddr,
    },
    /// A client connected and was registered.
    Accepted {
        /// Identifier assigned to the connection.
        conn_id: ConnectionId,
        /// Client endpoint.
        peer: SocketAddr,
    },
    /// A client sent a line; it is queued for broadcast.
    Received {
        /// Sending connection.
        conn_id: ConnectionId,
        /// Client endpoint.
        peer: SocketAddr,
        /// Line content, delimiter stripped.
        line: String,
    },
    /// A client disconnected or was dropped after a failed write.
    Disconnected {
        /// Identifier of the departed connection.
        conn_id: ConnectionId,
        /// Client endpoint.
        peer: SocketAddr,
    },
    /// Shutdown finished: the listener and every connection are closed.
    ShutdownComplete,
    /// A condition that stops the server.
    Fatal(String),
}

impl fmt::Display for ServerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Listening { addr } => write!(f, "Server listening on {addr}"),
            Self::Accepted { peer, .. } => write!(f, "Server accepted connection from {peer}"),
            Self::Received { peer, line, .. } => write!(f, "Message from {peer} - {line}"),
            Self::Disconnected { peer, .. } => write!(f, "Client at {peer} disconnected"),
            Self::ShutdownComplete => write!(f, "Server shut down"),
            Self::Fatal(reason) => write!(f, "Fatal: {reason}"),
        }
    }
}
