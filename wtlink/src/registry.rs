//! Shared map from session ID to the QUIC connection that owns it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use wtlink_quic::QuicConnId;

use crate::ipc::ConnectionId;

/// Where a session lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionEntry {
    pub conn: QuicConnId,
}

/// Sessions established on the listener, readable from any thread.
///
/// Registering an ID that is already present replaces the older entry.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RwLock<HashMap<ConnectionId, SessionEntry>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the previous owner when it was a different connection.
    pub fn register(&self, id: ConnectionId, conn: QuicConnId) -> Option<QuicConnId> {
        self.write()
            .insert(id, SessionEntry { conn })
            .map(|old| old.conn)
            .filter(|old| *old != conn)
    }

    /// Remove `id` if it still belongs to `conn`.
    pub fn remove(&self, id: ConnectionId, conn: QuicConnId) -> bool {
        let mut map = self.write();
        match map.get(&id) {
            Some(entry) if entry.conn == conn => {
                map.remove(&id);
                true
            }
            _ => false,
        }
    }

    /// Remove every session owned by `conn`.
    pub fn remove_connection(&self, conn: QuicConnId) {
        self.write().retain(|_, entry| entry.conn != conn);
    }

    pub fn lookup(&self, id: ConnectionId) -> Option<SessionEntry> {
        self.read().get(&id).copied()
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ConnectionId, SessionEntry>> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ConnectionId, SessionEntry>> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn most_recent_registration_wins() {
        let registry = SessionRegistry::new();
        assert_eq!(registry.register(ConnectionId(0), QuicConnId::from_index(1)), None);
        assert_eq!(registry.register(ConnectionId(0), QuicConnId::from_index(1)), None);
        assert_eq!(
            registry.register(ConnectionId(0), QuicConnId::from_index(2)),
            Some(QuicConnId::from_index(1))
        );
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.lookup(ConnectionId(0)),
            Some(SessionEntry {
                conn: QuicConnId::from_index(2)
            })
        );
    }

    #[test]
    fn remove_guarded_by_owner() {
        let registry = SessionRegistry::new();
        registry.register(ConnectionId(0), QuicConnId::from_index(2));
        assert!(!registry.remove(ConnectionId(0), QuicConnId::from_index(1)));
        assert!(registry.lookup(ConnectionId(0)).is_some());
        assert!(registry.remove(ConnectionId(0), QuicConnId::from_index(2)));
        assert!(registry.is_empty());
        assert!(!registry.remove(ConnectionId(0), QuicConnId::from_index(2)));
    }

    #[test]
    fn remove_connection_and_clear() {
        let registry = SessionRegistry::new();
        registry.register(ConnectionId(0), QuicConnId::from_index(1));
        registry.register(ConnectionId(4), QuicConnId::from_index(1));
        registry.register(ConnectionId(8), QuicConnId::from_index(2));
        registry.remove_connection(QuicConnId::from_index(1));
        assert_eq!(registry.len(), 1);

        let clone = registry.clone();
        clone.clear();
        assert!(registry.is_empty());
    }
}
