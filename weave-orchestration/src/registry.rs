//! # Session Registry
//!
//! Process-wide maps from connection identifier to a live session sink and
//! from user identifier to that user's delivery channel. Both transports
//! register here; the forwarders consult it; no entry outlives its owning
//! handler.
//!
//! User channels are single-seat: registering a channel for a user who
//! already has one closes the prior channel first (its cancellation token
//! fires, the displaced session tears itself down and unsubscribes).

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use weave_shared::messaging::Delivery;

/// Sink for one live connection
#[derive(Debug, Clone)]
pub struct ConnectionEntry {
    pub user_id: String,
    pub tx: mpsc::Sender<Delivery>,
}

/// A user's delivery channel, tagged with the session that owns it
#[derive(Debug)]
struct UserChannel {
    owner: Uuid,
    _tx: mpsc::Sender<Delivery>,
    cancel: CancellationToken,
}

/// Concurrent session maps
#[derive(Debug, Default)]
pub struct SessionRegistry {
    connections: DashMap<Uuid, ConnectionEntry>,
    users: DashMap<String, UserChannel>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------

    pub fn register_connection(
        &self,
        connection_id: Uuid,
        user_id: impl Into<String>,
        tx: mpsc::Sender<Delivery>,
    ) {
        self.connections.insert(
            connection_id,
            ConnectionEntry {
                user_id: user_id.into(),
                tx,
            },
        );
    }

    pub fn lookup_connection(&self, connection_id: Uuid) -> Option<ConnectionEntry> {
        self.connections.get(&connection_id).map(|e| e.clone())
    }

    pub fn remove_connection(&self, connection_id: Uuid) {
        self.connections.remove(&connection_id);
    }

    // ------------------------------------------------------------------
    // User channels
    // ------------------------------------------------------------------

    /// Install a user's delivery channel; a prior channel for the same
    /// user is closed first (single-seat semantics)
    pub fn register_user(
        &self,
        user_id: impl Into<String>,
        owner: Uuid,
        tx: mpsc::Sender<Delivery>,
        cancel: CancellationToken,
    ) {
        let user_id = user_id.into();
        if let Some(prior) = self.users.insert(
            user_id.clone(),
            UserChannel {
                owner,
                _tx: tx,
                cancel,
            },
        ) {
            debug!(
                user_id = %user_id,
                displaced_owner = %prior.owner,
                "Displacing prior session for user"
            );
            prior.cancel.cancel();
        }
    }

    pub fn user_registered(&self, user_id: &str) -> bool {
        self.users.contains_key(user_id)
    }

    /// Remove the user channel only if it still belongs to `owner`
    ///
    /// A displaced session must not tear down its replacement's entry.
    pub fn remove_user_if_owner(&self, user_id: &str, owner: Uuid) {
        self.users.remove_if(user_id, |_, channel| channel.owner == owner);
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (mpsc::Sender<Delivery>, mpsc::Receiver<Delivery>) {
        mpsc::channel(4)
    }

    #[tokio::test]
    async fn test_connection_register_lookup_remove() {
        let registry = SessionRegistry::new();
        let connection_id = Uuid::new_v4();
        let (tx, _rx) = channel();

        registry.register_connection(connection_id, "admin", tx);
        let entry = registry.lookup_connection(connection_id).unwrap();
        assert_eq!(entry.user_id, "admin");

        registry.remove_connection(connection_id);
        assert!(registry.lookup_connection(connection_id).is_none());
    }

    #[tokio::test]
    async fn test_duplicate_user_registration_cancels_prior() {
        let registry = SessionRegistry::new();
        let first_owner = Uuid::new_v4();
        let first_cancel = CancellationToken::new();
        let (first_tx, _first_rx) = channel();
        registry.register_user("admin", first_owner, first_tx, first_cancel.clone());

        let second_owner = Uuid::new_v4();
        let (second_tx, _second_rx) = channel();
        registry.register_user("admin", second_owner, second_tx, CancellationToken::new());

        assert!(first_cancel.is_cancelled());
        assert_eq!(registry.user_count(), 1);
    }

    #[tokio::test]
    async fn test_displaced_session_cannot_remove_replacement() {
        let registry = SessionRegistry::new();
        let first_owner = Uuid::new_v4();
        let (first_tx, _first_rx) = channel();
        registry.register_user("admin", first_owner, first_tx, CancellationToken::new());

        let second_owner = Uuid::new_v4();
        let (second_tx, _second_rx) = channel();
        registry.register_user("admin", second_owner, second_tx, CancellationToken::new());

        // Displaced session runs its cleanup path
        registry.remove_user_if_owner("admin", first_owner);
        assert!(registry.user_registered("admin"));

        // The owning session's cleanup removes it
        registry.remove_user_if_owner("admin", second_owner);
        assert!(!registry.user_registered("admin"));
    }
}
