use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc::UnboundedSender, RwLock};
use uuid::Uuid;

pub mod message_types;
pub mod relay;

pub use message_types::{ClientEvent, ReadAck, ReadReceipt, ServerEvent};
pub use relay::{Connection, ConnectionState, Relay, RelayError};

/// Unique identifier for a WebSocket connection
///
/// Minted on connect; never reused, so a reconnect is a new identity in the
/// registry even when the user identity is the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Joined member entry with identity and outbound channel
struct Member {
    identity: String,
    sender: UnboundedSender<String>,
}

/// Presence registry for the single room
///
/// Tracks which connections have joined and under which identity. Several
/// connections may share an identity. Fan-out snapshots the target set under
/// the read lock and sends after releasing it.
#[derive(Default, Clone)]
pub struct PresenceRegistry {
    // connection_id -> member
    inner: Arc<RwLock<HashMap<ConnectionId, Member>>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a connection to the room. Re-joining replaces the identity
    /// (last join wins) and keeps a single entry per connection.
    pub async fn join(&self, connection: ConnectionId, identity: &str, sender: UnboundedSender<String>) {
        let mut guard = self.inner.write().await;
        let previous = guard.insert(
            connection,
            Member {
                identity: identity.to_string(),
                sender,
            },
        );

        tracing::debug!(
            connection_id = %connection,
            identity,
            rejoin = previous.is_some(),
            members = guard.len(),
            "connection joined room"
        );
    }

    /// Remove a connection from the room. Returns whether it was a member.
    pub async fn leave(&self, connection: ConnectionId) -> bool {
        let mut guard = self.inner.write().await;
        match guard.remove(&connection) {
            Some(member) => {
                tracing::debug!(
                    connection_id = %connection,
                    identity = %member.identity,
                    remaining = guard.len(),
                    "connection left room"
                );
                true
            }
            None => false,
        }
    }

    /// Every joined connection.
    pub async fn members(&self) -> Vec<ConnectionId> {
        self.snapshot(None).await
    }

    /// Broadcast targets for an event originating from `connection`.
    pub async fn members_except(&self, connection: ConnectionId) -> Vec<ConnectionId> {
        self.snapshot(Some(connection)).await
    }

    async fn snapshot(&self, except: Option<ConnectionId>) -> Vec<ConnectionId> {
        let guard = self.inner.read().await;
        guard.keys().filter(|id| Some(**id) != except).copied().collect()
    }

    /// Queue `payload` for each of `targets` that is still a member.
    ///
    /// Returns the number of connections the payload was queued for. Members
    /// whose channel is closed are dropped from the registry.
    pub async fn send_to(&self, targets: &[ConnectionId], payload: &str) -> usize {
        let senders: Vec<(ConnectionId, UnboundedSender<String>)> = {
            let guard = self.inner.read().await;
            targets
                .iter()
                .filter_map(|id| guard.get(id).map(|m| (*id, m.sender.clone())))
                .collect()
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (id, sender) in senders {
            if sender.send(payload.to_string()).is_ok() {
                delivered += 1;
            } else {
                dead.push(id);
            }
        }

        if !dead.is_empty() {
            let mut guard = self.inner.write().await;
            for id in &dead {
                guard.remove(id);
            }
            tracing::debug!(
                cleaned = dead.len(),
                active = guard.len(),
                "dead connections cleaned up during fan-out"
            );
        }

        delivered
    }
}
