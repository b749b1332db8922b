//! A single TCP peer speaking the line protocol.
//!
//! [`Connection::wrap`] splits a [`TcpStream`] into two owners:
//!
//! - the [`Connection`] itself, shared behind an `Arc`, which writes lines and
//!   carries the open/closed status;
//! - a [`LineReader`], owned by exactly one reader task.
//!
//! Closing is idempotent and may race between the reader task and whoever is
//! writing. Exactly one [`Connection::close`] call observes `true`, which lets
//! callers emit their disconnect notification once.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;

use crate::line::{self, DEFAULT_MAX_LINE_LENGTH, LineError};

/// Default time a single line write may take before the peer is considered stalled.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier assigned when a stream is wrapped.
///
/// Identifiers increase monotonically, so ordering by id is registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Per-connection limits applied to both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionLimits {
    /// Longest accepted line in bytes, delimiter excluded.
    pub max_line_length: usize,
    /// Upper bound on a single line write.
    pub write_timeout: Duration,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

/// Errors raised by connection reads and writes.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The connection was closed locally.
    #[error("connection closed")]
    Closed,

    /// The transport failed, or the peer sent bytes that are not UTF-8.
    #[error("connection I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A write did not complete in time.
    #[error("write timed out after {0:?}")]
    Timeout(Duration),

    /// The peer sent a line longer than the configured maximum.
    #[error("peer sent a line longer than {max} bytes")]
    LineTooLong {
        /// Configured maximum.
        max: usize,
    },

    /// The caller tried to send text that is not a single line.
    #[error("invalid outgoing line: {0}")]
    InvalidLine(#[from] LineError),
}

impl ConnectionError {
    /// Whether this error means the peer should be treated as gone.
    ///
    /// Only [`ConnectionError::InvalidLine`] is a caller mistake that leaves
    /// the connection usable.
    #[must_use]
    pub const fn is_disconnect(&self) -> bool {
        !matches!(self, Self::InvalidLine(_))
    }

    fn from_codec(err: LinesCodecError, max: usize) -> Self {
        match err {
            LinesCodecError::MaxLineLengthExceeded => Self::LineTooLong { max },
            LinesCodecError::Io(e) => Self::Io(e),
        }
    }
}

type LineSink = FramedWrite<OwnedWriteHalf, LinesCodec>;

/// Shared, writable side of a peer connection.
pub struct Connection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    limits: ConnectionLimits,
    /// `None` once closed; dropping the write half sends FIN to the peer.
    writer: Mutex<Option<LineSink>>,
    closed: AtomicBool,
    close_signal: CancellationToken,
}

/// Read side of a peer connection, owned by a single reader task.
pub struct LineReader {
    id: ConnectionId,
    peer_addr: SocketAddr,
    max_line_length: usize,
    lines: FramedRead<OwnedReadHalf, LinesCodec>,
    close_signal: CancellationToken,
}

impl Connection {
    /// Wraps an established stream, returning the shared writer and the reader.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Io`] if the peer address cannot be read or
    /// socket options cannot be applied (typically the peer already reset).
    pub fn wrap(
        stream: TcpStream,
        limits: ConnectionLimits,
    ) -> Result<(Arc<Self>, LineReader), ConnectionError> {
        let peer_addr = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();

        let id = ConnectionId::next();
        let close_signal = CancellationToken::new();

        let conn = Arc::new(Self {
            id,
            peer_addr,
            limits,
            writer: Mutex::new(Some(FramedWrite::new(
                write_half,
                line::codec(limits.max_line_length),
            ))),
            closed: AtomicBool::new(false),
            close_signal: close_signal.clone(),
        });
        let reader = LineReader {
            id,
            peer_addr,
            max_line_length: limits.max_line_length,
            lines: FramedRead::new(read_half, line::codec(limits.max_line_length)),
            close_signal,
        };

        tracing::trace!(conn_id = %id, peer = %peer_addr, "connection wrapped");
        Ok((conn, reader))
    }

    /// Returns the connection identifier.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the remote endpoint.
    #[must_use]
    pub const fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Returns the limits this connection was wrapped with.
    #[must_use]
    pub const fn limits(&self) -> ConnectionLimits {
        self.limits
    }

    /// Whether [`Connection::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Resolves once the connection has been closed.
    pub async fn closed(&self) {
        self.close_signal.cancelled().await;
    }

    /// Writes one line and flushes it.
    ///
    /// A failure other than [`ConnectionError::InvalidLine`] means the peer
    /// is gone; the caller should clean up rather than retry.
    ///
    /// # Errors
    ///
    /// - [`ConnectionError::InvalidLine`] if `text` is not a single line.
    /// - [`ConnectionError::Closed`] if the connection is or becomes closed.
    /// - [`ConnectionError::Timeout`] if the peer does not drain in time.
    /// - [`ConnectionError::Io`] on transport failure.
    pub async fn write_line(&self, text: &str) -> Result<(), ConnectionError> {
        line::validate(text, self.limits.max_line_length)?;

        let mut guard = self.writer.lock().await;
        let Some(sink) = guard.as_mut() else {
            return Err(ConnectionError::Closed);
        };

        let timeout = self.limits.write_timeout;
        tokio::select! {
            biased;
            () = self.close_signal.cancelled() => Err(ConnectionError::Closed),
            sent = tokio::time::timeout(timeout, sink.send(text)) => match sent {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(ConnectionError::from_codec(e, self.limits.max_line_length)),
                Err(_) => Err(ConnectionError::Timeout(timeout)),
            },
        }
    }

    /// Closes the connection.
    ///
    /// Wakes the reader, interrupts any in-flight write, and releases the
    /// write half. Returns `true` only for the call that actually closed it;
    /// later calls are no-ops returning `false`.
    pub async fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.close_signal.cancel();

        let writer = self.writer.lock().await.take();
        if let Some(sink) = writer {
            drop(sink.into_inner());
        }

        tracing::debug!(conn_id = %self.id, peer = %self.peer_addr, "connection closed");
        true
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl LineReader {
    /// Returns the identifier of the connection this reader belongs to.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the remote endpoint.
    #[must_use]
    pub const fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Reads the next line.
    ///
    /// Returns `Ok(None)` when the peer has closed the stream or the
    /// connection was closed locally.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Io`] on transport failure or invalid UTF-8,
    /// and [`ConnectionError::LineTooLong`] when the peer exceeds the line
    /// limit. Both mean the peer should be treated as gone.
    pub async fn read_line(&mut self) -> Result<Option<String>, ConnectionError> {
        tokio::select! {
            biased;
            () = self.close_signal.cancelled() => Ok(None),
            next = self.lines.next() => match next {
                Some(Ok(line)) => Ok(Some(line)),
                Some(Err(e)) => Err(ConnectionError::from_codec(e, self.max_line_length)),
                None => Ok(None),
            },
        }
    }
}

impl fmt::Debug for LineReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineReader")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .finish_non_exhaustive()
    }
}
