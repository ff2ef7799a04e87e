/// Message metadata model
///
/// One row per message the worker has seen, keyed by the message identity
/// `(mailbox_id, folder, uid)` with a database uniqueness constraint. The
/// raw body is not stored here; `body_key` points into object storage.
///
/// Writes go through [`Message::upsert`]: syncing the same identity twice
/// never creates a second row, and the mutable fields (read/starred/labels
/// and the body pointer) take last-write-wins semantics so a later pass can
/// refresh flags the user changed on another client.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE messages (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     mailbox_id UUID NOT NULL REFERENCES mailboxes(id) ON DELETE CASCADE,
///     folder VARCHAR(255) NOT NULL DEFAULT 'INBOX',
///     uid BIGINT NOT NULL,
///     message_id TEXT,
///     subject TEXT NOT NULL DEFAULT '',
///     sender TEXT NOT NULL DEFAULT '',
///     recipients JSONB NOT NULL DEFAULT '[]',
///     internal_date TIMESTAMPTZ,
///     snippet TEXT NOT NULL DEFAULT '',
///     is_read BOOLEAN NOT NULL DEFAULT FALSE,
///     is_starred BOOLEAN NOT NULL DEFAULT FALSE,
///     labels JSONB NOT NULL DEFAULT '[]',
///     body_key TEXT,
///     has_attachments BOOLEAN NOT NULL DEFAULT FALSE,
///     size_bytes BIGINT,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     UNIQUE (mailbox_id, folder, uid)
/// );
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use uuid::Uuid;

/// Synced message metadata row
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Message {
    /// Unique row ID
    pub id: Uuid,

    /// Owning mailbox connection
    pub mailbox_id: Uuid,

    /// IMAP folder the message lives in
    pub folder: String,

    /// IMAP UID within the folder's current UIDVALIDITY
    pub uid: i64,

    /// RFC 5322 Message-ID header, when the message carried one
    pub message_id: Option<String>,

    /// Decoded subject
    pub subject: String,

    /// Formatted sender ("Name <addr@host>")
    pub sender: String,

    /// Recipient addresses (JSON array of strings)
    pub recipients: JsonValue,

    /// Server INTERNALDATE
    pub internal_date: Option<DateTime<Utc>>,

    /// Short plain-text preview for list views
    pub snippet: String,

    /// Mapped from the IMAP \Seen flag
    pub is_read: bool,

    /// Mapped from the IMAP \Flagged flag
    pub is_starred: bool,

    /// Remaining IMAP keywords (JSON array of strings)
    pub labels: JsonValue,

    /// Object storage key of the raw body, once stored
    pub body_key: Option<String>,

    /// Whether MIME parsing found attachment parts
    pub has_attachments: bool,

    /// Raw message size in bytes, when known
    pub size_bytes: Option<i64>,

    /// When the row was first created
    pub created_at: DateTime<Utc>,

    /// When the row was last written
    pub updated_at: DateTime<Utc>,
}

/// Input for upserting a message row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertMessage {
    pub mailbox_id: Uuid,
    pub folder: String,
    pub uid: i64,
    pub message_id: Option<String>,
    pub subject: String,
    pub sender: String,
    pub recipients: JsonValue,
    pub internal_date: Option<DateTime<Utc>>,
    pub snippet: String,
    pub is_read: bool,
    pub is_starred: bool,
    pub labels: JsonValue,
    pub body_key: Option<String>,
    pub has_attachments: bool,
    pub size_bytes: Option<i64>,
}

const MESSAGE_COLUMNS: &str = r#"id, mailbox_id, folder, uid, message_id, subject, sender,
           recipients, internal_date, snippet, is_read, is_starred, labels,
           body_key, has_attachments, size_bytes, created_at, updated_at"#;

impl Message {
    /// Inserts or refreshes a message row by identity
    ///
    /// Mutable fields are overwritten with the incoming values. The body
    /// pointer and size are kept when the incoming write carries none, so a
    /// metadata-only refresh does not orphan an already-stored body.
    pub async fn upsert(pool: &PgPool, data: UpsertMessage) -> Result<Self, sqlx::Error> {
        let message = sqlx::query_as::<_, Message>(&format!(
            r#"
            INSERT INTO messages (mailbox_id, folder, uid, message_id, subject, sender,
                                  recipients, internal_date, snippet, is_read, is_starred,
                                  labels, body_key, has_attachments, size_bytes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (mailbox_id, folder, uid) DO UPDATE SET
                message_id = EXCLUDED.message_id,
                subject = EXCLUDED.subject,
                sender = EXCLUDED.sender,
                recipients = EXCLUDED.recipients,
                internal_date = EXCLUDED.internal_date,
                snippet = EXCLUDED.snippet,
                is_read = EXCLUDED.is_read,
                is_starred = EXCLUDED.is_starred,
                labels = EXCLUDED.labels,
                body_key = COALESCE(EXCLUDED.body_key, messages.body_key),
                has_attachments = EXCLUDED.has_attachments,
                size_bytes = COALESCE(EXCLUDED.size_bytes, messages.size_bytes),
                updated_at = NOW()
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(data.mailbox_id)
        .bind(data.folder)
        .bind(data.uid)
        .bind(data.message_id)
        .bind(data.subject)
        .bind(data.sender)
        .bind(data.recipients)
        .bind(data.internal_date)
        .bind(data.snippet)
        .bind(data.is_read)
        .bind(data.is_starred)
        .bind(data.labels)
        .bind(data.body_key)
        .bind(data.has_attachments)
        .bind(data.size_bytes)
        .fetch_one(pool)
        .await?;

        Ok(message)
    }

    /// Finds a message by its sync identity
    pub async fn find_by_identity(
        pool: &PgPool,
        mailbox_id: Uuid,
        folder: &str,
        uid: i64,
    ) -> Result<Option<Self>, sqlx::Error> {
        let message = sqlx::query_as::<_, Message>(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS}
            FROM messages
            WHERE mailbox_id = $1 AND folder = $2 AND uid = $3
            "#
        ))
        .bind(mailbox_id)
        .bind(folder)
        .bind(uid)
        .fetch_optional(pool)
        .await?;

        Ok(message)
    }

    /// Lists a mailbox's messages, newest first
    pub async fn list_by_mailbox(
        pool: &PgPool,
        mailbox_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let messages = sqlx::query_as::<_, Message>(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS}
            FROM messages
            WHERE mailbox_id = $1
            ORDER BY internal_date DESC NULLS LAST
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(mailbox_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;

        Ok(messages)
    }

    /// Counts a mailbox's messages
    pub async fn count_by_mailbox(pool: &PgPool, mailbox_id: Uuid) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM messages WHERE mailbox_id = $1")
                .bind(mailbox_id)
                .fetch_one(pool)
                .await?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_input_serializes() {
        let data = UpsertMessage {
            mailbox_id: Uuid::new_v4(),
            folder: "INBOX".to_string(),
            uid: 42,
            message_id: Some("<abc@example.com>".to_string()),
            subject: "Hello".to_string(),
            sender: "Alice <alice@example.com>".to_string(),
            recipients: serde_json::json!(["bob@example.com"]),
            internal_date: None,
            snippet: "Hello Bob".to_string(),
            is_read: false,
            is_starred: false,
            labels: serde_json::json!([]),
            body_key: None,
            has_attachments: false,
            size_bytes: Some(1024),
        };

        let json = serde_json::to_string(&data).unwrap();
        assert!(json.contains("\"folder\":\"INBOX\""));
        assert!(json.contains("\"uid\":42"));
    }

    // Upsert/duplicate semantics against a live database are covered in
    // tests/message_store_tests.rs.
}
