use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Media kind of an attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Video,
}

impl AttachmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttachmentKind::Image => "image",
            AttachmentKind::Video => "video",
        }
    }
}

impl fmt::Display for AttachmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttachmentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "image" => Ok(AttachmentKind::Image),
            "video" => Ok(AttachmentKind::Video),
            other => Err(format!("unknown attachment kind {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub url: String,
    pub kind: AttachmentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,
}

/// The durable unit of conversation.
///
/// `id` is assigned by the store; a message broadcast while the store is
/// unreachable carries no id. `timestamp` is epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default, alias = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub sender: String,
    #[serde(default)]
    pub text: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    #[serde(default)]
    pub read_by: BTreeSet<String>,
}

impl Message {
    /// Build the outbound form of a validated message. `readBy` starts empty.
    pub fn from_new(new: NewMessage, id: Option<String>, created_at: Option<DateTime<Utc>>) -> Self {
        Self {
            id,
            sender: new.sender,
            text: new.text,
            timestamp: new.timestamp,
            created_at,
            attachment: new.attachment,
            read_by: BTreeSet::new(),
        }
    }

    /// Monotonic insert into `readBy`. The sender is never recorded.
    /// Returns whether the set changed.
    pub fn mark_read_by(&mut self, identity: &str) -> bool {
        if identity == self.sender {
            return false;
        }
        self.read_by.insert(identity.to_string())
    }
}

/// A validated message ready to be appended to the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub sender: String,
    pub text: String,
    pub timestamp: i64,
    pub attachment: Option<Attachment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("message has neither text nor attachment")]
pub struct InvalidDraft;

/// `send-message` payload as emitted by clients.
///
/// Accepts both the nested `attachment` object and the flat
/// `fileUrl`/`fileType`/`fileName` fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

impl MessageDraft {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    fn resolved_attachment(&self) -> Option<Attachment> {
        if let Some(att) = &self.attachment {
            if !att.url.trim().is_empty() {
                return Some(att.clone());
            }
        }
        let url = self.file_url.as_deref().map(str::trim).filter(|u| !u.is_empty())?;
        let kind = self
            .file_type
            .as_deref()
            .and_then(|k| k.parse::<AttachmentKind>().ok())?;
        Some(Attachment {
            url: url.to_string(),
            kind,
            original_name: self.file_name.clone().filter(|n| !n.is_empty()),
        })
    }

    /// Validate the draft into a [`NewMessage`].
    ///
    /// A blank sender falls back to `fallback_sender`; a missing or unusable
    /// timestamp falls back to `now_ms`.
    pub fn validate(&self, fallback_sender: &str, now_ms: i64) -> Result<NewMessage, InvalidDraft> {
        let text = self.text.as_deref().unwrap_or("").trim().to_string();
        let attachment = self.resolved_attachment();
        if text.is_empty() && attachment.is_none() {
            return Err(InvalidDraft);
        }

        let sender = self
            .sender
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(fallback_sender)
            .to_string();

        let timestamp = self
            .timestamp
            .as_ref()
            .and_then(normalize_timestamp)
            .unwrap_or(now_ms);

        Ok(NewMessage {
            sender,
            text,
            timestamp,
            attachment,
        })
    }
}

/// Interpret a client supplied send time as epoch milliseconds.
///
/// Numbers, numeric strings and RFC 3339 strings are accepted; negative or
/// non-finite values are rejected.
pub fn normalize_timestamp(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => {
            if let Some(ms) = n.as_i64() {
                return (ms >= 0).then_some(ms);
            }
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0 && *f <= i64::MAX as f64)
                .map(|f| f as i64)
        }
        JsonValue::String(s) => {
            let s = s.trim();
            if let Ok(ms) = s.parse::<i64>() {
                return (ms >= 0).then_some(ms);
            }
            DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.timestamp_millis())
                .filter(|ms| *ms >= 0)
        }
        _ => None,
    }
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
