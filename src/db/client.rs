use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// How long a writer waits for another import's transaction to finish
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

use crate::db::models::*;

#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the database file and create tables
    ///
    /// WAL lets readers run next to a chunk transaction, and writers from other
    /// imports queue on the busy timeout instead of failing.
    pub async fn new(database_path: &str) -> Result<Self, sqlx::Error> {
        // Use sqlite:// with ?mode=rwc to create if it doesn't exist
        let database_url = format!("sqlite://{}?mode=rwc", database_path);
        info!("Connecting to {}", database_url);
        let options = SqliteConnectOptions::from_str(&database_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        let db = Database { pool };
        db.create_tables().await?;
        Ok(db)
    }

    /// Open a private in-memory database
    ///
    /// The pool holds exactly one connection that never expires; every connection
    /// to `sqlite::memory:` is its own database, so a second one would see empty tables.
    pub async fn new_in_memory() -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let db = Database { pool };
        db.create_tables().await?;
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create all necessary tables
    async fn create_tables(&self) -> Result<(), sqlx::Error> {
        // Conversations table (chat groups and channels)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id INTEGER PRIMARY KEY,
                kind TEXT NOT NULL,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Participants table (authors, actors, reactors)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS participants (
                id INTEGER PRIMARY KEY,
                display_name TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Messages table, natural key (conversation_id, source_message_id)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id INTEGER NOT NULL,
                source_message_id INTEGER NOT NULL,
                sender_id INTEGER,
                sent_at TEXT NOT NULL,
                message_type TEXT NOT NULL,
                text TEXT,
                reply_to_message_id INTEGER,
                forwarded_from_id INTEGER,
                forwarded_from_name TEXT,
                media_sha256 TEXT,
                media_file_name TEXT,
                media_file_size INTEGER,
                media_mime_type TEXT,
                media_duration_seconds INTEGER,
                media_width INTEGER,
                media_height INTEGER,
                entities TEXT,
                FOREIGN KEY (conversation_id) REFERENCES conversations (id) ON DELETE CASCADE,
                UNIQUE(conversation_id, source_message_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Service events table, same natural key as messages
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS service_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id INTEGER NOT NULL,
                source_message_id INTEGER NOT NULL,
                actor_id INTEGER,
                occurred_at TEXT NOT NULL,
                action TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                FOREIGN KEY (conversation_id) REFERENCES conversations (id) ON DELETE CASCADE,
                UNIQUE(conversation_id, source_message_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Reactions table
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id INTEGER NOT NULL,
                participant_id INTEGER NOT NULL,
                emoji TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (message_id) REFERENCES messages (id) ON DELETE CASCADE,
                UNIQUE(message_id, participant_id, emoji)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_sent_at ON messages (conversation_id, sent_at)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_media_sha256 ON messages (media_sha256)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_reactions_message_id ON reactions (message_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Get conversation by ID
    pub async fn get_conversation(&self, id: i64) -> Result<Option<DbConversation>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT id, kind, name, created_at, updated_at FROM conversations WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(DbConversation {
                id: row.get("id"),
                kind: row.get("kind"),
                name: row.get("name"),
                created_at: timestamp_column(&row, "created_at")?,
                updated_at: timestamp_column(&row, "updated_at")?,
            })
        })
        .transpose()
    }

    /// Get participant by ID
    pub async fn get_participant(&self, id: i64) -> Result<Option<DbParticipant>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT id, display_name, created_at, updated_at FROM participants WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(DbParticipant {
                id: row.get("id"),
                display_name: row.get("display_name"),
                created_at: timestamp_column(&row, "created_at")?,
                updated_at: timestamp_column(&row, "updated_at")?,
            })
        })
        .transpose()
    }

    /// Get a message by its natural key
    pub async fn get_message(
        &self,
        conversation_id: i64,
        source_message_id: i64,
    ) -> Result<Option<DbMessage>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT
                id, conversation_id, source_message_id, sender_id, sent_at, message_type,
                text, reply_to_message_id, forwarded_from_id, forwarded_from_name,
                media_sha256, media_file_name, media_file_size, media_mime_type,
                media_duration_seconds, media_width, media_height, entities
            FROM messages
            WHERE conversation_id = ? AND source_message_id = ?
            "#,
        )
        .bind(conversation_id)
        .bind(source_message_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| message_from_row(&row)).transpose()
    }

    /// Get all messages of a conversation in source order
    pub async fn get_messages_for_conversation(
        &self,
        conversation_id: i64,
    ) -> Result<Vec<DbMessage>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT
                id, conversation_id, source_message_id, sender_id, sent_at, message_type,
                text, reply_to_message_id, forwarded_from_id, forwarded_from_name,
                media_sha256, media_file_name, media_file_size, media_mime_type,
                media_duration_seconds, media_width, media_height, entities
            FROM messages
            WHERE conversation_id = ?
            ORDER BY source_message_id
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(message_from_row).collect()
    }

    /// Get a service event by its natural key
    pub async fn get_service_event(
        &self,
        conversation_id: i64,
        source_message_id: i64,
    ) -> Result<Option<DbServiceEvent>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, conversation_id, source_message_id, actor_id, occurred_at, action, metadata
            FROM service_events
            WHERE conversation_id = ? AND source_message_id = ?
            "#,
        )
        .bind(conversation_id)
        .bind(source_message_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(DbServiceEvent {
                id: row.get("id"),
                conversation_id: row.get("conversation_id"),
                source_message_id: row.get("source_message_id"),
                actor_id: row.get("actor_id"),
                occurred_at: timestamp_column(&row, "occurred_at")?,
                action: row.get("action"),
                metadata: row.get("metadata"),
            })
        })
        .transpose()
    }

    /// Get all reactions for a message (internal message id)
    pub async fn get_reactions_for_message(
        &self,
        message_id: i64,
    ) -> Result<Vec<DbReaction>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, message_id, participant_id, emoji, created_at
            FROM reactions
            WHERE message_id = ?
            ORDER BY id
            "#,
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(DbReaction {
                    id: row.get("id"),
                    message_id: row.get("message_id"),
                    participant_id: row.get("participant_id"),
                    emoji: row.get("emoji"),
                    created_at: timestamp_column(row, "created_at")?,
                })
            })
            .collect()
    }

    pub async fn count_messages(&self, conversation_id: i64) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE conversation_id = ?")
            .bind(conversation_id)
            .fetch_one(&self.pool)
            .await
    }

    pub async fn count_service_events(&self, conversation_id: i64) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM service_events WHERE conversation_id = ?")
            .bind(conversation_id)
            .fetch_one(&self.pool)
            .await
    }
}

fn message_from_row(row: &SqliteRow) -> Result<DbMessage, sqlx::Error> {
    let message_type: String = row.get("message_type");
    let message_type = MessageType::parse(&message_type).ok_or_else(|| {
        sqlx::Error::Decode(format!("unknown message type: {}", message_type).into())
    })?;

    Ok(DbMessage {
        id: row.get("id"),
        conversation_id: row.get("conversation_id"),
        source_message_id: row.get("source_message_id"),
        sender_id: row.get("sender_id"),
        sent_at: timestamp_column(row, "sent_at")?,
        message_type,
        text: row.get("text"),
        reply_to_message_id: row.get("reply_to_message_id"),
        forwarded_from_id: row.get("forwarded_from_id"),
        forwarded_from_name: row.get("forwarded_from_name"),
        media_sha256: row.get("media_sha256"),
        media_file_name: row.get("media_file_name"),
        media_file_size: row.get("media_file_size"),
        media_mime_type: row.get("media_mime_type"),
        media_duration_seconds: row.get("media_duration_seconds"),
        media_width: row.get("media_width"),
        media_height: row.get("media_height"),
        entities: row.get("entities"),
    })
}

/// Timestamps are stored as RFC 3339 text
fn timestamp_column(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>, sqlx::Error> {
    let raw: String = row.try_get(column)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))
}
