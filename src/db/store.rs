// # Import Store
//
// The relational capabilities the import pipeline needs, expressed as a pair of
// traits so the orchestrator can run against SQLite in production and against
// fault-injecting wrappers in tests.
//
// Every write happens inside an `ImportTransaction`; the orchestrator opens one
// per chunk and either commits or rolls it back as a unit. Slow work such as media
// uploads runs before the transaction opens, so the SQLite write lock is only held
// for relational statements.

use crate::db::client::Database;
use crate::db::models::{DbConversation, DbMessage, DbParticipant, DbReaction, DbServiceEvent};
use sqlx::Sqlite;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Transaction error: {0}")]
    Transaction(String),
}

const MESSAGE_EXISTS_SQL: &str =
    "SELECT EXISTS(SELECT 1 FROM messages WHERE conversation_id = ? AND source_message_id = ?)";

/// Opens chunk-scoped transactions
#[async_trait::async_trait]
pub trait ImportStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn ImportTransaction>, StoreError>;

    /// Lookup outside any transaction, used to skip media work for stored records
    async fn message_exists(
        &self,
        conversation_id: i64,
        source_message_id: i64,
    ) -> Result<bool, StoreError>;
}

/// Writes and lookups scoped to one open transaction
#[async_trait::async_trait]
pub trait ImportTransaction: Send {
    async fn upsert_conversation(&mut self, conversation: &DbConversation)
        -> Result<(), StoreError>;

    async fn upsert_participant(&mut self, participant: &DbParticipant) -> Result<(), StoreError>;

    async fn message_exists(
        &mut self,
        conversation_id: i64,
        source_message_id: i64,
    ) -> Result<bool, StoreError>;

    async fn service_event_exists(
        &mut self,
        conversation_id: i64,
        source_message_id: i64,
    ) -> Result<bool, StoreError>;

    /// Returns the internal row id of the new message
    async fn insert_message(&mut self, message: &DbMessage) -> Result<i64, StoreError>;

    async fn insert_service_event(&mut self, event: &DbServiceEvent) -> Result<(), StoreError>;

    async fn insert_reaction(&mut self, reaction: &DbReaction) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// SQLite transaction handed out by `Database`
pub struct SqliteImportTransaction {
    tx: sqlx::Transaction<'static, Sqlite>,
}

#[async_trait::async_trait]
impl ImportStore for Database {
    async fn begin(&self) -> Result<Box<dyn ImportTransaction>, StoreError> {
        let tx = self.pool().begin().await?;
        Ok(Box::new(SqliteImportTransaction { tx }))
    }

    async fn message_exists(
        &self,
        conversation_id: i64,
        source_message_id: i64,
    ) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(MESSAGE_EXISTS_SQL)
            .bind(conversation_id)
            .bind(source_message_id)
            .fetch_one(self.pool())
            .await?;
        Ok(exists)
    }
}

#[async_trait::async_trait]
impl ImportTransaction for SqliteImportTransaction {
    async fn upsert_conversation(
        &mut self,
        conversation: &DbConversation,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO conversations (id, kind, name, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                kind = excluded.kind,
                name = excluded.name,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(conversation.id)
        .bind(&conversation.kind)
        .bind(&conversation.name)
        .bind(conversation.created_at.to_rfc3339())
        .bind(conversation.updated_at.to_rfc3339())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn upsert_participant(&mut self, participant: &DbParticipant) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO participants (id, display_name, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                display_name = COALESCE(excluded.display_name, participants.display_name),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(participant.id)
        .bind(&participant.display_name)
        .bind(participant.created_at.to_rfc3339())
        .bind(participant.updated_at.to_rfc3339())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn message_exists(
        &mut self,
        conversation_id: i64,
        source_message_id: i64,
    ) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(MESSAGE_EXISTS_SQL)
            .bind(conversation_id)
            .bind(source_message_id)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(exists)
    }

    async fn service_event_exists(
        &mut self,
        conversation_id: i64,
        source_message_id: i64,
    ) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM service_events WHERE conversation_id = ? AND source_message_id = ?)",
        )
        .bind(conversation_id)
        .bind(source_message_id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(exists)
    }

    async fn insert_message(&mut self, message: &DbMessage) -> Result<i64, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO messages (
                conversation_id, source_message_id, sender_id, sent_at, message_type,
                text, reply_to_message_id, forwarded_from_id, forwarded_from_name,
                media_sha256, media_file_name, media_file_size, media_mime_type,
                media_duration_seconds, media_width, media_height, entities
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(message.conversation_id)
        .bind(message.source_message_id)
        .bind(message.sender_id)
        .bind(message.sent_at.to_rfc3339())
        .bind(message.message_type.as_str())
        .bind(&message.text)
        .bind(message.reply_to_message_id)
        .bind(message.forwarded_from_id)
        .bind(&message.forwarded_from_name)
        .bind(&message.media_sha256)
        .bind(&message.media_file_name)
        .bind(message.media_file_size)
        .bind(&message.media_mime_type)
        .bind(message.media_duration_seconds)
        .bind(message.media_width)
        .bind(message.media_height)
        .bind(&message.entities)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn insert_service_event(&mut self, event: &DbServiceEvent) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO service_events (
                conversation_id, source_message_id, actor_id, occurred_at, action, metadata
            ) VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (conversation_id, source_message_id) DO NOTHING
            "#,
        )
        .bind(event.conversation_id)
        .bind(event.source_message_id)
        .bind(event.actor_id)
        .bind(event.occurred_at.to_rfc3339())
        .bind(&event.action)
        .bind(&event.metadata)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_reaction(&mut self, reaction: &DbReaction) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO reactions (message_id, participant_id, emoji, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (message_id, participant_id, emoji) DO NOTHING
            "#,
        )
        .bind(reaction.message_id)
        .bind(reaction.participant_id)
        .bind(&reaction.emoji)
        .bind(reaction.created_at.to_rfc3339())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
