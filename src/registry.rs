//! Process-wide registry of active sessions.
//!
//! The registry is pure bookkeeping: connection-id to session metadata.
//! It is created once at process start and shared (cheaply cloned) into
//! every session; sessions insert themselves when they start running and
//! remove themselves as the last step of teardown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// Metadata kept per active session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Peer address of the client side, as reported at accept time.
    pub peer: String,

    /// When the session was registered.
    pub created_at: Instant,
}

/// Concurrent map from connection identifier to active session metadata.
///
/// A session is present here if and only if its teardown has not yet
/// completed. Many sessions' teardown paths may remove entries concurrently.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    sessions: Arc<RwLock<HashMap<String, SessionInfo>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session under its connection id.
    pub async fn insert(&self, connection_id: &str, peer: &str) {
        let info = SessionInfo {
            peer: peer.to_string(),
            created_at: Instant::now(),
        };
        self.sessions
            .write()
            .await
            .insert(connection_id.to_string(), info);
    }

    /// Remove a session. Removing an absent id is a no-op, so teardown
    /// stays idempotent from the registry's point of view.
    pub async fn remove(&self, connection_id: &str) {
        self.sessions.write().await.remove(connection_id);
    }

    /// Whether a session is currently registered.
    pub async fn contains(&self, connection_id: &str) -> bool {
        self.sessions.read().await.contains_key(connection_id)
    }

    /// Look up a session's metadata.
    pub async fn get(&self, connection_id: &str) -> Option<SessionInfo> {
        self.sessions.read().await.get(connection_id).cloned()
    }

    /// Number of active sessions.
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Connection ids of all active sessions (for monitoring/debugging).
    pub async fn connection_ids(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }
}
