//! Relay core: per-connection state machine plus fan-out.
//!
//! Transport independent. The WebSocket route parses frames into
//! [`ClientEvent`]s and feeds them to [`Relay::serve`], which handles one
//! connection's events strictly in arrival order. Outbound frames are queued
//! as serialized JSON on the connection's channel.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use super::message_types::{ClientEvent, ReadAck, ReadReceipt, ServerEvent};
use super::{ConnectionId, PresenceRegistry};
use crate::models::message::{now_millis, InvalidDraft, Message, MessageDraft};
use crate::services::message_store::{MessageStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Joined { identity: String },
    Disconnected,
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    InvalidDraft(#[from] InvalidDraft),

    #[error("event requires a joined connection")]
    NotJoined,

    #[error("identity must not be blank")]
    BlankIdentity,

    #[error("connection is closed")]
    Disconnected,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Session state of one client connection
pub struct Connection {
    id: ConnectionId,
    state: ConnectionState,
    outbound: UnboundedSender<String>,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn identity(&self) -> Option<&str> {
        match &self.state {
            ConnectionState::Joined { identity } => Some(identity),
            _ => None,
        }
    }

    fn send(&self, event: &ServerEvent) -> Result<(), RelayError> {
        let frame = event.to_json()?;
        if self.outbound.send(frame).is_err() {
            debug!(connection_id = %self.id, "outbound channel closed");
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct Relay {
    store: Arc<dyn MessageStore>,
    presence: PresenceRegistry,
    history_limit: usize,
}

impl Relay {
    pub fn new(store: Arc<dyn MessageStore>, presence: PresenceRegistry, history_limit: usize) -> Self {
        Self {
            store,
            presence,
            history_limit,
        }
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    /// Open a connection. The receiver yields every frame addressed to it.
    pub fn connect(&self) -> (Connection, UnboundedReceiver<String>) {
        let (tx, rx) = unbounded_channel();
        let conn = Connection {
            id: ConnectionId::new(),
            state: ConnectionState::Connected,
            outbound: tx,
        };
        debug!(connection_id = %conn.id, "connection opened");
        (conn, rx)
    }

    /// Handle one inbound event for `conn`.
    pub async fn handle(&self, conn: &mut Connection, event: ClientEvent) -> Result<(), RelayError> {
        if conn.state == ConnectionState::Disconnected {
            return Err(RelayError::Disconnected);
        }
        match event {
            ClientEvent::Join(identity) => self.join(conn, &identity).await,
            ClientEvent::SendMessage(draft) => self.send_message(conn, draft).await,
            ClientEvent::MarkAsRead(ack) => self.mark_as_read(conn, ack).await,
        }
    }

    async fn join(&self, conn: &mut Connection, identity: &str) -> Result<(), RelayError> {
        let identity = identity.trim();
        if identity.is_empty() {
            return Err(RelayError::BlankIdentity);
        }

        // Register before reading history so nothing sent in between is lost;
        // a message in both the replay and a live frame is deduplicated by clients.
        self.presence.join(conn.id, identity, conn.outbound.clone()).await;
        conn.state = ConnectionState::Joined {
            identity: identity.to_string(),
        };
        info!(connection_id = %conn.id, identity, "joined room");

        match self.store.recent(self.history_limit).await {
            Ok(history) => {
                debug!(connection_id = %conn.id, count = history.len(), "replaying history");
                conn.send(&ServerEvent::PreviousMessages(history))?;
            }
            Err(e) => {
                warn!(
                    connection_id = %conn.id,
                    backend = self.store.backend(),
                    error = %e,
                    "history unavailable, skipping replay"
                );
            }
        }
        Ok(())
    }

    async fn send_message(&self, conn: &mut Connection, draft: MessageDraft) -> Result<(), RelayError> {
        let identity = conn.identity().ok_or(RelayError::NotJoined)?.to_string();
        let new = draft.validate(&identity, now_millis())?;

        let (outbound, persisted) = match self.store.append(new.clone()).await {
            Ok(saved) => (saved, true),
            Err(e) => {
                warn!(
                    connection_id = %conn.id,
                    backend = self.store.backend(),
                    error = %e,
                    "append failed, broadcasting without id"
                );
                (Message::from_new(new, None, None), false)
            }
        };

        let frame = ServerEvent::ReceiveMessage(outbound.clone()).to_json()?;
        let targets = self.presence.members_except(conn.id).await;
        let delivered = self.presence.send_to(&targets, &frame).await;
        debug!(
            connection_id = %conn.id,
            message_id = outbound.id.as_deref().unwrap_or("-"),
            persisted,
            delivered,
            "message relayed"
        );

        if persisted {
            conn.send(&ServerEvent::MessageConfirmed(outbound))?;
        }
        Ok(())
    }

    async fn mark_as_read(&self, conn: &mut Connection, ack: ReadAck) -> Result<(), RelayError> {
        let joined = conn.identity().ok_or(RelayError::NotJoined)?;
        let identity = match ack.identity.trim() {
            "" => joined.to_string(),
            other => other.to_string(),
        };
        let message_id = ack.message_id.trim();
        if message_id.is_empty() {
            return Err(StoreError::NotFound.into());
        }

        let updated = match self.store.mark_read(message_id, &identity).await {
            Ok(message) => message,
            Err(e) => {
                debug!(connection_id = %conn.id, message_id, error = %e, "read ack dropped");
                return Err(e.into());
            }
        };

        if updated.sender == identity {
            return Ok(());
        }

        let frame = ServerEvent::MessageRead(ReadReceipt {
            message_id: message_id.to_string(),
            read_by: identity,
        })
        .to_json()?;
        let targets = self.presence.members().await;
        self.presence.send_to(&targets, &frame).await;
        Ok(())
    }

    /// Leave the room. Nothing is broadcast.
    pub async fn disconnect(&self, conn: &mut Connection) {
        if conn.state == ConnectionState::Disconnected {
            return;
        }
        self.presence.leave(conn.id).await;
        conn.state = ConnectionState::Disconnected;
        info!(connection_id = %conn.id, "connection closed");
    }

    /// Drive one connection until its inbound queue closes.
    ///
    /// Failures of individual events stay contained to that event.
    pub async fn serve(self, mut conn: Connection, mut inbound: UnboundedReceiver<ClientEvent>) {
        while let Some(event) = inbound.recv().await {
            match self.handle(&mut conn, event).await {
                Ok(()) => {}
                Err(RelayError::Store(StoreError::Unavailable(_))) => {}
                Err(RelayError::Disconnected) => break,
                Err(e) => debug!(connection_id = %conn.id, error = %e, "event ignored"),
            }
        }
        self.disconnect(&mut conn).await;
    }
}
