//! The set of live connections on the broadcast channel.
//!
//! This is the only state shared between connection tasks. Every mutation
//! and every read goes through one lock, so a snapshot never sees a
//! half-applied insert or removal.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use parking_lot::RwLock;

use super::connection::{Connection, ConnectionId};
use crate::metrics::RelayStats;

/// Guarded collection of live connections.
#[derive(Debug, Default)]
pub struct ConnectionSet {
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
}

impl ConnectionSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a connection. Returns `false` (and leaves the set untouched)
    /// if one with the same id is already present.
    pub fn add(&self, connection: Arc<Connection>) -> bool {
        match self.connections.write().entry(connection.id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                let _ = slot.insert(connection);
                true
            }
        }
    }

    /// Remove a connection. Returns `false` if it was not present.
    pub fn remove(&self, id: &ConnectionId) -> bool {
        self.connections.write().remove(id).is_some()
    }

    /// Every member except `id`, copied out under the lock.
    pub fn snapshot_excluding(&self, id: &ConnectionId) -> Vec<Arc<Connection>> {
        self.connections
            .read()
            .iter()
            .filter(|(member, _)| *member != id)
            .map(|(_, conn)| Arc::clone(conn))
            .collect()
    }

    /// Whether `id` is currently a member.
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.read().contains_key(id)
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Add `connection` and return a guard that removes it when dropped.
    ///
    /// The guard is held by the connection's own handler, which makes that
    /// handler the only path by which the connection leaves the set, on
    /// every exit: clean close, error, panic, or the task being dropped.
    pub fn register(self: &Arc<Self>, connection: Arc<Connection>) -> Membership {
        let id = connection.id.clone();
        let _ = self.add(connection);
        Membership {
            set: Arc::clone(self),
            id,
            stats: None,
        }
    }
}

/// Membership of one connection; leaving scope removes it from the set.
#[derive(Debug)]
pub struct Membership {
    set: Arc<ConnectionSet>,
    id: ConnectionId,
    stats: Option<Arc<RelayStats>>,
}

impl Membership {
    /// Count this connection in `stats` as closed when it leaves the set.
    #[must_use]
    pub fn counted_in(mut self, stats: Arc<RelayStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    /// The registered connection's id.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }
}

impl Drop for Membership {
    fn drop(&mut self) {
        // Counted before removal so anyone watching the set sees the tally first.
        if let Some(stats) = &self.stats {
            stats.record_closed();
        }
        let _ = self.set.remove(&self.id);
    }
}
