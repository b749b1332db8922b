//! Registry of live client connections.
//!
//! The [`ConnectionRegistry`] is the recipient set for broadcasts. Every
//! operation takes the lock for exactly one call and never across an
//! `.await`, so an add or remove is either fully visible or not at all.
//!
//! Broadcasts iterate a [`ConnectionRegistry::snapshot`] rather than the live
//! set: membership changes during a pass neither skip nor duplicate
//! recipients of that pass. A connection removed after the snapshot was taken
//! may still be written to once; the failed write is how the broadcaster
//! notices it is gone.

use std::collections::BTreeMap;
use std::sync::Arc;

use linechat_proto::connection::{Connection, ConnectionId};
use parking_lot::Mutex;

/// Thread-safe set of open connections, ordered by registration.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    members: Mutex<BTreeMap<ConnectionId, Arc<Connection>>>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connection.
    ///
    /// Returns `false` without inserting if the connection is already closed
    /// or already registered.
    pub fn add(&self, conn: Arc<Connection>) -> bool {
        if conn.is_closed() {
            return false;
        }
        let mut members = self.members.lock();
        if members.contains_key(&conn.id()) {
            return false;
        }
        members.insert(conn.id(), conn);
        drop(members);
        true
    }

    /// Removes a connection. Removing an absent connection is a no-op that
    /// returns `false`.
    pub fn remove(&self, conn: &Connection) -> bool {
        self.members.lock().remove(&conn.id()).is_some()
    }

    /// Returns a consistent copy of the current members in registration order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.members.lock().values().cloned().collect()
    }

    /// Removes and returns every member.
    pub fn drain(&self) -> Vec<Arc<Connection>> {
        let members = std::mem::take(&mut *self.members.lock());
        members.into_values().collect()
    }

    /// Whether the given connection is currently registered.
    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.members.lock().contains_key(&id)
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.lock().len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.lock().is_empty()
    }
}
