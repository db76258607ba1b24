use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_postgres::Row;
use uuid::Uuid;

use super::message_store::{MessageStore, StoreError, StoreResult};
use crate::db;
use crate::models::message::{Attachment, Message, NewMessage};

const COLUMNS: &str = "id, sender, text, sent_at_ms, created_at, \
                       attachment_url, attachment_kind, attachment_name, read_by";

/// Postgres-backed message store.
///
/// Every failure to reach the database maps to [`StoreError::Unavailable`];
/// the schema is (re)applied lazily if it could not be applied at start-up.
pub struct PostgresStore {
    pool: Pool,
    schema_ready: AtomicBool,
}

impl PostgresStore {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            schema_ready: AtomicBool::new(false),
        }
    }

    /// Apply the schema now. Failure leaves the store usable; the next
    /// operation retries.
    pub async fn bootstrap(&self) -> StoreResult<()> {
        db::migrate(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        self.schema_ready.store(true, Ordering::Release);
        Ok(())
    }

    async fn client(&self) -> StoreResult<deadpool_postgres::Object> {
        if !self.schema_ready.load(Ordering::Acquire) {
            self.bootstrap().await?;
        }
        self.pool.get().await.map_err(unavailable)
    }
}

fn unavailable(e: impl std::fmt::Display) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn row_to_message(row: &Row) -> StoreResult<Message> {
    let id: Uuid = row.try_get("id").map_err(unavailable)?;
    let url: Option<String> = row.try_get("attachment_url").map_err(unavailable)?;
    let kind: Option<String> = row.try_get("attachment_kind").map_err(unavailable)?;
    let original_name: Option<String> = row.try_get("attachment_name").map_err(unavailable)?;
    let attachment = match (url, kind.and_then(|k| k.parse().ok())) {
        (Some(url), Some(kind)) => Some(Attachment {
            url,
            kind,
            original_name,
        }),
        _ => None,
    };
    let read_by: Vec<String> = row.try_get("read_by").map_err(unavailable)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(unavailable)?;

    Ok(Message {
        id: Some(id.to_string()),
        sender: row.try_get("sender").map_err(unavailable)?,
        text: row.try_get("text").map_err(unavailable)?,
        timestamp: row.try_get("sent_at_ms").map_err(unavailable)?,
        created_at: Some(created_at),
        attachment,
        read_by: read_by.into_iter().collect(),
    })
}

#[async_trait]
impl MessageStore for PostgresStore {
    async fn append(&self, message: NewMessage) -> StoreResult<Message> {
        let client = self.client().await?;
        let id = Uuid::new_v4();
        let (url, kind, name) = match &message.attachment {
            Some(att) => (
                Some(att.url.as_str()),
                Some(att.kind.as_str()),
                att.original_name.as_deref(),
            ),
            None => (None, None, None),
        };

        let row = client
            .query_one(
                &format!(
                    "INSERT INTO messages \
                     (id, sender, text, sent_at_ms, attachment_url, attachment_kind, attachment_name) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7) \
                     RETURNING {COLUMNS}"
                ),
                &[
                    &id,
                    &message.sender,
                    &message.text,
                    &message.timestamp,
                    &url,
                    &kind,
                    &name,
                ],
            )
            .await
            .map_err(unavailable)?;

        row_to_message(&row)
    }

    async fn recent(&self, limit: usize) -> StoreResult<Vec<Message>> {
        let client = self.client().await?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = client
            .query(
                &format!(
                    "SELECT {COLUMNS} FROM messages \
                     ORDER BY sent_at_ms DESC, created_at DESC \
                     LIMIT $1"
                ),
                &[&limit],
            )
            .await
            .map_err(unavailable)?;

        let mut messages = rows.iter().map(row_to_message).collect::<StoreResult<Vec<_>>>()?;
        messages.reverse();
        Ok(messages)
    }

    async fn mark_read(&self, id: &str, identity: &str) -> StoreResult<Message> {
        let id = Uuid::parse_str(id).map_err(|_| StoreError::NotFound)?;
        let client = self.client().await?;
        let row = client
            .query_opt(
                &format!(
                    "UPDATE messages SET read_by = CASE \
                         WHEN $2 = sender OR $2 = ANY(read_by) THEN read_by \
                         ELSE array_append(read_by, $2) \
                     END \
                     WHERE id = $1 \
                     RETURNING {COLUMNS}"
                ),
                &[&id, &identity],
            )
            .await
            .map_err(unavailable)?
            .ok_or(StoreError::NotFound)?;

        row_to_message(&row)
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}
