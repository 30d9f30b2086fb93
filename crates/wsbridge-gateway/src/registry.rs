//! Live connection registry
//!
//! Insert-on-connect / remove-on-disconnect bookkeeping for lifecycle
//! visibility. It holds no protocol state.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use uuid::Uuid;

/// One live connection
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    /// Connection id (also used in logs as `conn_id`)
    pub id: Uuid,
    /// Remote address, when the transport knows it
    pub peer: Option<SocketAddr>,
    /// Facility the connection is attached to
    pub facility: String,
    /// When the upgrade completed
    pub connected_at: DateTime<Utc>,
}

/// Registry of live connections
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<Uuid, ConnectionInfo>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a connection; it is removed when the guard drops.
    pub fn register(self: &Arc<Self>, info: ConnectionInfo) -> RegistrationGuard {
        let id = info.id;
        self.connections.insert(id, info);
        RegistrationGuard {
            registry: Arc::clone(self),
            id,
        }
    }

    /// Number of live connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no connection is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Copy of every live connection, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ConnectionInfo> {
        let mut all: Vec<ConnectionInfo> =
            self.connections.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|c| c.connected_at);
        all
    }
}

/// Removes its connection from the registry on drop
#[derive(Debug)]
pub struct RegistrationGuard {
    registry: Arc<ConnectionRegistry>,
    id: Uuid,
}

impl RegistrationGuard {
    /// Id of the registered connection.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.registry.connections.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(facility: &str) -> ConnectionInfo {
        ConnectionInfo {
            id: Uuid::new_v4(),
            peer: None,
            facility: facility.to_string(),
            connected_at: Utc::now(),
        }
    }

    #[test]
    fn test_register_and_drop() {
        let registry = ConnectionRegistry::new();
        let a = registry.register(info("chat"));
        let b = registry.register(info("news"));
        assert_eq!(registry.len(), 2);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.iter().any(|c| c.id == a.id()));

        drop(a);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.snapshot()[0].id, b.id());

        drop(b);
        assert!(registry.is_empty());
    }
}
