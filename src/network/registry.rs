//! Session Registry
//!
//! Tracks the single live connection for each player id. Registering a
//! second connection for an id closes the first one (multi-device
//! reconnect); the evicted connection's supervisor then cleans itself up.

use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::info;

use crate::network::connection::{ConnectionHandle, PlayerIdentity};

/// Player id → current connection.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<BTreeMap<String, ConnectionHandle>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `handle` the live connection for `identity`.
    ///
    /// Any other connection already registered for the same id is closed
    /// and returned.
    pub async fn register(
        &self,
        identity: &PlayerIdentity,
        handle: ConnectionHandle,
    ) -> Option<ConnectionHandle> {
        let mut sessions = self.sessions.write().await;

        let evicted = sessions
            .insert(identity.id.clone(), handle.clone())
            .filter(|old| *old != handle);

        if let Some(old) = &evicted {
            old.close();
            info!(
                player = %identity.id,
                old = old.id(),
                new = handle.id(),
                "Evicted duplicate session"
            );
        }

        evicted
    }

    /// Remove the entry for `identity`, but only if `handle` still holds it.
    ///
    /// A newer connection that replaced `handle` is left untouched.
    pub async fn unregister(&self, identity: &PlayerIdentity, handle: &ConnectionHandle) -> bool {
        let mut sessions = self.sessions.write().await;

        match sessions.get(&identity.id) {
            Some(stored) if stored == handle => {
                sessions.remove(&identity.id);
                true
            }
            _ => false,
        }
    }

    /// Current connection for a player id.
    pub async fn get(&self, player_id: &str) -> Option<ConnectionHandle> {
        self.sessions.read().await.get(player_id).cloned()
    }

    /// Number of live sessions.
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Close every registered connection (server shutdown).
    pub async fn close_all(&self) {
        let sessions = self.sessions.read().await;
        for handle in sessions.values() {
            handle.close();
        }
    }
}
