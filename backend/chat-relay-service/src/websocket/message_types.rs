use serde::{Deserialize, Serialize};

use crate::models::message::{Message, MessageDraft};

/// Inbound WebSocket events from client to server
///
/// Frames look like `{"event": "send-message", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Admit this connection to the room under an identity
    #[serde(rename = "join")]
    Join(String),

    #[serde(rename = "send-message")]
    SendMessage(MessageDraft),

    #[serde(rename = "mark-as-read")]
    MarkAsRead(ReadAck),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadAck {
    #[serde(default)]
    pub message_id: String,
    #[serde(default, alias = "user")]
    pub identity: String,
}

/// Outbound WebSocket events from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// History replay on join, oldest first
    #[serde(rename = "previous-messages")]
    PreviousMessages(Vec<Message>),

    /// A message from another connection
    #[serde(rename = "receive-message")]
    ReceiveMessage(Message),

    /// Persisted copy of the connection's own message
    #[serde(rename = "message-confirmed")]
    MessageConfirmed(Message),

    #[serde(rename = "message-read")]
    MessageRead(ReadReceipt),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub message_id: String,
    pub read_by: String,
}

impl ServerEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_client_frames() {
        let join: ClientEvent = serde_json::from_value(json!({"event": "join", "data": "alice"})).unwrap();
        assert_eq!(join, ClientEvent::Join("alice".into()));

        let ack: ClientEvent = serde_json::from_value(json!({
            "event": "mark-as-read",
            "data": {"messageId": "m1", "user": "bob"}
        }))
        .unwrap();
        assert_eq!(
            ack,
            ClientEvent::MarkAsRead(ReadAck {
                message_id: "m1".into(),
                identity: "bob".into(),
            })
        );

        let send: ClientEvent = serde_json::from_value(json!({
            "event": "send-message",
            "data": {"sender": "alice", "text": "hi", "timestamp": 1000}
        }))
        .unwrap();
        match send {
            ClientEvent::SendMessage(draft) => {
                assert_eq!(draft.text.as_deref(), Some("hi"));
                assert_eq!(draft.timestamp, Some(json!(1000)));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_events() {
        assert!(serde_json::from_value::<ClientEvent>(json!({"event": "typing", "data": {}})).is_err());
        assert!(serde_json::from_value::<ClientEvent>(json!({"event": "join", "data": 5})).is_err());
    }

    #[test]
    fn read_receipt_wire_shape() {
        let evt = ServerEvent::MessageRead(ReadReceipt {
            message_id: "m1".into(),
            read_by: "bob".into(),
        });
        let value: serde_json::Value = serde_json::from_str(&evt.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"event": "message-read", "data": {"messageId": "m1", "readBy": "bob"}})
        );
    }
}
