//! Durable message store contract.
//!
//! The relay only talks to persistence through [`MessageStore`]; the
//! Postgres-backed store and the in-process store both implement it.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::message::{Message, NewMessage};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Backing store unreachable. Callers degrade instead of failing.
    #[error("message store unavailable: {0}")]
    Unavailable(String),

    #[error("message not found")]
    NotFound,
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message, assigning its id and creation time.
    async fn append(&self, message: NewMessage) -> StoreResult<Message>;

    /// Up to `limit` most recently sent messages, oldest first.
    async fn recent(&self, limit: usize) -> StoreResult<Vec<Message>>;

    /// Add `identity` to the message's `readBy` set. Re-adding is a no-op,
    /// and the sender is never added. Returns the updated message.
    async fn mark_read(&self, id: &str, identity: &str) -> StoreResult<Message>;

    /// Short backend name for logs.
    fn backend(&self) -> &'static str;
}
