use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use parley_types::models::Message;
use parley_types::notify::{NotificationEvent, Topic};

use crate::Database;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// The durable store gateway: the only seam through which the relay touches
/// the relational store, including the cross-process publish primitive.
///
/// Every write that should be visible in real time publishes exactly one
/// [`NotificationEvent`] after its commit, never before. Callers compose the
/// message path (`create_message` then `publish`); the moderation paths
/// (`soft_delete_message`, `hide_message`) publish internally because no
/// other in-process caller sits between the update and the announcement.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a message row. The id is server-generated; the caller supplies
    /// the verified author id.
    async fn create_message(
        &self,
        conversation_id: &str,
        author_id: &str,
        content: &str,
        kind: &str,
    ) -> Result<Message, StoreError>;

    /// Bump the conversation's `last_message_at` recency signal.
    async fn touch_conversation(&self, conversation_id: &str) -> Result<(), StoreError>;

    /// Idempotent reaction add: re-adding an existing triple is a no-op
    /// success.
    async fn upsert_reaction(
        &self,
        message_id: &str,
        user_id: &str,
        emoji: &str,
    ) -> Result<(), StoreError>;

    /// Remove a reaction by its key triple. No-op if absent.
    async fn delete_reaction(
        &self,
        message_id: &str,
        user_id: &str,
        emoji: &str,
    ) -> Result<(), StoreError>;

    async fn message_author(&self, message_id: &str) -> Result<Option<String>, StoreError>;

    async fn participants(&self, conversation_id: &str) -> Result<Vec<String>, StoreError>;

    /// Stamp `deleted_at` and announce `message_deleted`. Returns the
    /// pointer if the message existed and was not already deleted.
    async fn soft_delete_message(
        &self,
        message_id: &str,
    ) -> Result<Option<NotificationEvent>, StoreError>;

    /// Stamp `hidden_at` and announce `message_hidden`.
    async fn hide_message(
        &self,
        message_id: &str,
    ) -> Result<Option<NotificationEvent>, StoreError>;

    /// Announce an event on the cross-process channel.
    async fn publish(&self, topic: Topic, event: &NotificationEvent) -> Result<(), StoreError>;
}

#[async_trait]
impl Store for Database {
    async fn create_message(
        &self,
        conversation_id: &str,
        author_id: &str,
        content: &str,
        kind: &str,
    ) -> Result<Message, StoreError> {
        let id = Uuid::new_v4().to_string();

        let row = sqlx::query(
            "INSERT INTO messages (id, conversation_id, author_id, content, kind)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING created_at",
        )
        .bind(&id)
        .bind(conversation_id)
        .bind(author_id)
        .bind(content)
        .bind(kind)
        .fetch_one(self.pool())
        .await?;

        let created_at: DateTime<Utc> = row.get("created_at");

        Ok(Message {
            id,
            conversation_id: conversation_id.to_string(),
            author_id: author_id.to_string(),
            content: content.to_string(),
            kind: kind.to_string(),
            created_at,
            deleted_at: None,
            hidden_at: None,
        })
    }

    async fn touch_conversation(&self, conversation_id: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE conversations SET last_message_at = now() WHERE id = $1")
            .bind(conversation_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    async fn upsert_reaction(
        &self,
        message_id: &str,
        user_id: &str,
        emoji: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO reactions (message_id, user_id, emoji)
             VALUES ($1, $2, $3)
             ON CONFLICT (message_id, user_id, emoji) DO NOTHING",
        )
        .bind(message_id)
        .bind(user_id)
        .bind(emoji)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn delete_reaction(
        &self,
        message_id: &str,
        user_id: &str,
        emoji: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "DELETE FROM reactions WHERE message_id = $1 AND user_id = $2 AND emoji = $3",
        )
        .bind(message_id)
        .bind(user_id)
        .bind(emoji)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn message_author(&self, message_id: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT author_id FROM messages WHERE id = $1")
            .bind(message_id)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map(|r| r.get("author_id")))
    }

    async fn participants(&self, conversation_id: &str) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(
            "SELECT user_id FROM conversation_participants WHERE conversation_id = $1",
        )
        .bind(conversation_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(|r| r.get("user_id")).collect())
    }

    async fn soft_delete_message(
        &self,
        message_id: &str,
    ) -> Result<Option<NotificationEvent>, StoreError> {
        let row = sqlx::query(
            "UPDATE messages SET deleted_at = now()
             WHERE id = $1 AND deleted_at IS NULL
             RETURNING conversation_id",
        )
        .bind(message_id)
        .fetch_optional(self.pool())
        .await?;

        let Some(row) = row else { return Ok(None) };
        let event = NotificationEvent {
            message_id: message_id.to_string(),
            conversation_id: row.get("conversation_id"),
        };
        self.publish(Topic::MessageDeleted, &event).await?;
        Ok(Some(event))
    }

    async fn hide_message(
        &self,
        message_id: &str,
    ) -> Result<Option<NotificationEvent>, StoreError> {
        let row = sqlx::query(
            "UPDATE messages SET hidden_at = now()
             WHERE id = $1 AND hidden_at IS NULL
             RETURNING conversation_id",
        )
        .bind(message_id)
        .fetch_optional(self.pool())
        .await?;

        let Some(row) = row else { return Ok(None) };
        let event = NotificationEvent {
            message_id: message_id.to_string(),
            conversation_id: row.get("conversation_id"),
        };
        self.publish(Topic::MessageHidden, &event).await?;
        Ok(Some(event))
    }

    async fn publish(&self, topic: Topic, event: &NotificationEvent) -> Result<(), StoreError> {
        let payload = serde_json::to_string(event)?;
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(topic.as_str())
            .bind(payload)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}
