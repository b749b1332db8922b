//! FIFO of inbound lines awaiting broadcast.
//!
//! Reader tasks [`InboundQueue::push`] concurrently; the single broadcast
//! task [`InboundQueue::pop`]s. Insertion order is broadcast order. Closing
//! the queue wakes a blocked `pop`, which then reports end-of-queue.
//!
//! The queue is capped; when a push would exceed the cap the oldest waiting
//! line is evicted, so `push` never blocks a reader.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Default maximum number of lines waiting for broadcast.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 1000;

#[derive(Debug, Default)]
struct QueueState {
    lines: VecDeque<String>,
    closed: bool,
}

/// Multi-producer, single-consumer line queue with explicit shutdown.
#[derive(Debug)]
pub struct InboundQueue {
    state: Mutex<QueueState>,
    available: Notify,
    max_queue_size: usize,
}

impl Default for InboundQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InboundQueue {
    /// Creates an empty, open queue with the default size limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_queue_size(DEFAULT_MAX_QUEUE_SIZE)
    }

    /// Creates an empty, open queue holding at most `max_queue_size` lines
    /// (at least one).
    #[must_use]
    pub fn with_max_queue_size(max_queue_size: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            available: Notify::new(),
            max_queue_size: max_queue_size.max(1),
        }
    }

    /// Appends a line. Returns `false` (dropping the line) once closed.
    ///
    /// If the queue is full, the oldest waiting line is evicted (FIFO).
    pub fn push(&self, line: String) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        state.lines.push_back(line);
        let evicted = state.lines.len() > self.max_queue_size;
        if evicted {
            state.lines.pop_front();
        }
        drop(state);

        if evicted {
            tracing::warn!(max = self.max_queue_size, "inbound queue full, dropped oldest line");
        }
        self.available.notify_one();
        true
    }

    /// Takes the oldest line, waiting until one is available.
    ///
    /// Returns `None` once the queue has been closed. Lines still queued at
    /// that point are discarded: shutdown is terminal and their recipients
    /// are about to be disconnected.
    pub async fn pop(&self) -> Option<String> {
        loop {
            // Register interest before checking, so a push between the check
            // and the await still wakes us.
            let available = self.available.notified();
            {
                let mut state = self.state.lock();
                if state.closed {
                    return None;
                }
                if let Some(line) = state.lines.pop_front() {
                    return Some(line);
                }
            }
            available.await;
        }
    }

    /// Closes the queue and wakes any waiting consumer. Idempotent.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        let dropped = state.lines.len();
        state.lines.clear();
        drop(state);

        if dropped > 0 {
            tracing::info!(dropped, "inbound queue closed with undelivered lines");
        }
        self.available.notify_waiters();
        self.available.notify_one();
    }

    /// Whether [`InboundQueue::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of lines waiting for broadcast.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().lines.len()
    }

    /// Whether no lines are waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().lines.is_empty()
    }
}
