// Online-identity registry: which socket currently speaks for each user.
//
// At most one live connection per identity. A newer registration replaces
// the older one, and an unregister only removes the entry when it still
// belongs to the disconnecting socket, so a late disconnect of a replaced
// socket cannot evict its successor.

use std::{collections::HashMap, sync::Arc};

use chitchat_common::protocol::ws::ServerEvent;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Outbound side of one live socket.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub identity: String,
    pub connection_id: Uuid,
    outbound: mpsc::UnboundedSender<ServerEvent>,
}

impl ConnectionHandle {
    pub fn new(identity: impl Into<String>, outbound: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self { identity: identity.into(), connection_id: Uuid::new_v4(), outbound }
    }

    /// Queue an event for the socket's writer. Fails once the socket task
    /// has gone away.
    pub fn send(&self, event: ServerEvent) -> Result<(), ServerEvent> {
        self.outbound.send(event).map_err(|error| error.0)
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PresenceRegistry {
    connections: Arc<RwLock<HashMap<String, ConnectionHandle>>>,
}

impl PresenceRegistry {
    /// Make `handle` the live connection for its identity, returning the
    /// connection it replaced.
    pub async fn register(&self, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        self.connections.write().await.insert(handle.identity.clone(), handle)
    }

    /// Remove the entry for `handle.identity` only if it is still `handle`.
    pub async fn unregister(&self, handle: &ConnectionHandle) -> bool {
        let mut connections = self.connections.write().await;
        match connections.get(&handle.identity) {
            Some(current) if current.connection_id == handle.connection_id => {
                connections.remove(&handle.identity);
                true
            }
            _ => false,
        }
    }

    pub async fn lookup(&self, identity: &str) -> Option<ConnectionHandle> {
        self.connections.read().await.get(identity).cloned()
    }

    /// Handles of every online identity, cloned out of the lock.
    pub async fn snapshot(&self) -> Vec<ConnectionHandle> {
        self.connections.read().await.values().cloned().collect()
    }

    pub async fn online_count(&self) -> usize {
        self.connections.read().await.len()
    }
}
