//! Set of live connections, shared by all connection tasks of a server.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::connection::{Connection, ConnectionId};

/// Lock-guarded map of live connections keyed by their id.
///
/// The lock is only held for the map operation itself, never across an
/// `.await` or while a user callback runs.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    conns: Mutex<HashMap<ConnectionId, Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connection. Returns `false` if it was already present.
    pub fn insert(&self, conn: Connection) -> bool {
        self.lock().insert(conn.id(), conn).is_none()
    }

    /// Removes a connection, returning it if it was present.
    pub fn remove(&self, id: ConnectionId) -> Option<Connection> {
        self.lock().remove(&id)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<Connection> {
        self.lock().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copies out the current members so callers can iterate without the lock.
    pub fn snapshot(&self) -> Vec<Connection> {
        self.lock().values().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, Connection>> {
        // The map stays consistent even if a holder panicked.
        self.conns.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
