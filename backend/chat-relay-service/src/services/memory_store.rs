use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::message_store::{MessageStore, StoreError, StoreResult};
use crate::models::message::{Message, NewMessage};

pub const DEFAULT_CAPACITY: usize = 10_000;

/// In-process store. Used when no database is configured and as the store
/// fake in tests. Contents do not survive a restart.
///
/// Holds at most `capacity` messages; the oldest by timestamp are evicted
/// first.
pub struct MemoryStore {
    // ascending by timestamp, equal timestamps in insertion order
    messages: RwLock<VecDeque<Message>>,
    capacity: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            messages: RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.read().await.is_empty()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append(&self, message: NewMessage) -> StoreResult<Message> {
        let stored = Message::from_new(
            message,
            Some(Uuid::new_v4().to_string()),
            Some(Utc::now()),
        );

        let mut guard = self.messages.write().await;
        let at = guard.partition_point(|m| m.timestamp <= stored.timestamp);
        guard.insert(at, stored.clone());
        while guard.len() > self.capacity {
            guard.pop_front();
        }
        Ok(stored)
    }

    async fn recent(&self, limit: usize) -> StoreResult<Vec<Message>> {
        let guard = self.messages.read().await;
        let skip = guard.len().saturating_sub(limit);
        Ok(guard.range(skip..).cloned().collect())
    }

    async fn mark_read(&self, id: &str, identity: &str) -> StoreResult<Message> {
        let mut guard = self.messages.write().await;
        let message = guard
            .iter_mut()
            .find(|m| m.id.as_deref() == Some(id))
            .ok_or(StoreError::NotFound)?;
        message.mark_read_by(identity);
        Ok(message.clone())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
