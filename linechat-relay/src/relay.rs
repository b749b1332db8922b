//! Relay server core: shared state, accept loop, and per-connection readers.
//!
//! Data flows one way through the server:
//!
//! ```text
//! clients ─▶ accept loop ─▶ registry + reader task per connection
//!                                      │ push
//!                                      ▼
//!                               inbound queue ─▶ broadcast loop ─▶ registry snapshot ─▶ clients
//! ```
//!
//! [`start_server`] binds the listener and returns only once the server is
//! accepting, so callers never have to poll for readiness.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use linechat_proto::connection::{Connection, ConnectionLimits, LineReader};
use linechat_proto::surface::EventSink;
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::broadcast;
use crate::config::RelayConfig;
use crate::event::ServerEvent;
use crate::queue::{DEFAULT_MAX_QUEUE_SIZE, InboundQueue};
use crate::registry::ConnectionRegistry;
use crate::shutdown;

/// Pause after an accept error unrelated to shutdown (e.g. out of file
/// descriptors) before accepting again.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Sink type the server reports to.
pub type ServerSink = Arc<dyn EventSink<ServerEvent>>;

/// Errors that prevent the server from starting.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listening socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was attempted.
        addr: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The bound address could not be read back.
    #[error("failed to read listener address: {0}")]
    LocalAddr(std::io::Error),
}

/// State shared by every server task.
pub struct RelayState {
    /// Live connections, the broadcast recipient set.
    pub registry: ConnectionRegistry,
    /// Lines waiting for broadcast.
    pub inbound: InboundQueue,
    shutdown: CancellationToken,
    limits: ConnectionLimits,
    sink: ServerSink,
}

impl RelayState {
    /// Creates state with an empty registry and a default-sized queue.
    #[must_use]
    pub fn new(limits: ConnectionLimits, sink: ServerSink) -> Self {
        Self::with_config(limits, DEFAULT_MAX_QUEUE_SIZE, sink)
    }

    /// Creates state with an empty registry and a queue capped at
    /// `max_queue_size` lines.
    #[must_use]
    pub fn with_config(limits: ConnectionLimits, max_queue_size: usize, sink: ServerSink) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            inbound: InboundQueue::with_max_queue_size(max_queue_size),
            shutdown: CancellationToken::new(),
            limits,
            sink,
        }
    }

    /// Whether shutdown has begun.
    #[must_use]
    pub fn is_stopping(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Returns the process-wide shutdown signal.
    #[must_use]
    pub const fn shutdown_signal(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Reports an event to the operator.
    pub fn emit(&self, event: ServerEvent) {
        self.sink.emit(event);
    }

    /// Forgets a departed peer: unregisters and closes it.
    ///
    /// Safe to call from the reader task and the broadcaster concurrently.
    /// Only the caller whose close actually takes effect reports the
    /// disconnect, so the operator sees it once.
    pub async fn disconnect(&self, conn: &Connection) {
        self.registry.remove(conn);
        if conn.close().await {
            tracing::info!(conn_id = %conn.id(), peer = %conn.peer_addr(), "client disconnected");
            self.emit(ServerEvent::Disconnected {
                conn_id: conn.id(),
                peer: conn.peer_addr(),
            });
        }
    }
}

/// Handle to a running server.
///
/// Cheap to clone; all clones control the same server.
#[derive(Clone)]
pub struct RelayHandle {
    local_addr: SocketAddr,
    state: Arc<RelayState>,
    tasks: TaskTracker,
    accept_task: Arc<Mutex<Option<JoinHandle<()>>>>,
    finished: CancellationToken,
}

impl RelayHandle {
    /// Address the listener is bound to.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shared server state.
    #[must_use]
    pub const fn state(&self) -> &Arc<RelayState> {
        &self.state
    }

    /// Number of currently registered connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.state.registry.len()
    }

    /// Returns a clone of the shutdown signal.
    #[must_use]
    pub fn shutdown_signal(&self) -> CancellationToken {
        self.state.shutdown.clone()
    }

    /// Stops the server and waits until every task has finished.
    ///
    /// Idempotent: later or concurrent calls wait for the first to finish.
    /// The teardown runs in its own task, so dropping this future part-way
    /// does not leave the server half stopped.
    pub async fn shutdown(&self) {
        let accept_task = self.accept_task.lock().take();
        if let Some(accept_task) = accept_task {
            let state = Arc::clone(&self.state);
            let tasks = self.tasks.clone();
            let finished = self.finished.clone();
            tokio::spawn(async move {
                shutdown::run(&state, accept_task, &tasks).await;
                finished.cancel();
            });
        }
        self.wait().await;
    }

    /// Waits until the server has fully shut down.
    pub async fn wait(&self) {
        self.finished.cancelled().await;
    }
}

/// Starts the relay server described by `config`.
///
/// Binds `host:port`, spawns the accept and broadcast loops, and returns once
/// the listener is accepting. Failing to bind is the one fatal server error.
///
/// # Errors
///
/// Returns [`ServerError::Bind`] if the listener cannot bind.
pub async fn start_server(config: &RelayConfig, sink: ServerSink) -> Result<RelayHandle, ServerError> {
    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;
    let local_addr = listener.local_addr().map_err(ServerError::LocalAddr)?;

    let state = Arc::new(RelayState::with_config(
        config.connection_limits(),
        config.max_queue_size,
        sink,
    ));
    let tasks = TaskTracker::new();

    tracing::info!(addr = %local_addr, "relay server listening");
    state.emit(ServerEvent::Listening { addr: local_addr });

    tasks.spawn(broadcast::run(Arc::clone(&state)));
    let accept_task = tokio::spawn(accept_loop(listener, Arc::clone(&state), tasks.clone()));

    Ok(RelayHandle {
        local_addr,
        state,
        tasks,
        accept_task: Arc::new(Mutex::new(Some(accept_task))),
        finished: CancellationToken::new(),
    })
}

/// Accepts connections until shutdown, then drops (closes) the listener.
async fn accept_loop(listener: TcpListener, state: Arc<RelayState>, tasks: TaskTracker) {
    loop {
        let accepted = tokio::select! {
            biased;
            () = state.shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => admit(&state, &tasks, stream, peer),
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                tokio::select! {
                    () = state.shutdown.cancelled() => break,
                    () = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => {}
                }
            }
        }
    }

    drop(listener);
    tracing::info!("listener closed");
}

/// Registers a freshly accepted stream and spawns its reader.
fn admit(state: &Arc<RelayState>, tasks: &TaskTracker, stream: TcpStream, peer: SocketAddr) {
    let (conn, reader) = match Connection::wrap(stream, state.limits) {
        Ok(pair) => pair,
        Err(e) => {
            tracing::warn!(peer = %peer, error = %e, "dropping connection that failed setup");
            return;
        }
    };

    if !state.registry.add(Arc::clone(&conn)) {
        tracing::warn!(conn_id = %conn.id(), peer = %peer, "connection closed before registration");
        return;
    }

    tracing::info!(conn_id = %conn.id(), peer = %peer, "connection accepted");
    state.emit(ServerEvent::Accepted {
        conn_id: conn.id(),
        peer,
    });

    tasks.spawn(read_loop(Arc::clone(state), conn, reader));
}

/// Reader task: queues every line from one client until it goes away.
async fn read_loop(state: Arc<RelayState>, conn: Arc<Connection>, mut reader: LineReader) {
    loop {
        match reader.read_line().await {
            Ok(Some(line)) => {
                tracing::debug!(conn_id = %conn.id(), len = line.len(), "line received");
                if !state.inbound.push(line.clone()) {
                    // Queue closed: shutdown owns the connection from here.
                    break;
                }
                state.emit(ServerEvent::Received {
                    conn_id: conn.id(),
                    peer: conn.peer_addr(),
                    line,
                });
            }
            Ok(None) => {
                tracing::debug!(conn_id = %conn.id(), "end of stream");
                break;
            }
            Err(e) => {
                if conn.is_closed() {
                    tracing::debug!(conn_id = %conn.id(), error = %e, "read failed after close");
                } else {
                    tracing::warn!(conn_id = %conn.id(), error = %e, "read failed");
                }
                break;
            }
        }
    }

    state.disconnect(&conn).await;
}
