/// Mailbox connection model
///
/// A mailbox connection is one stored credential/config record identifying an
/// external account the worker polls. Each connection carries its IMAP
/// endpoint, the folders to sync, an operational status, and per-folder sync
/// cursors in the companion `mailbox_cursors` table.
///
/// # Status
///
/// ```text
/// active ⇄ paused
/// active → error     (sync failure recorded; still polled next pass)
/// error  → active    (first successful pass clears it)
/// ```
///
/// # Schema
///
/// ```sql
/// CREATE TABLE mailboxes (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     display_name VARCHAR(255) NOT NULL DEFAULT '',
///     address VARCHAR(255) NOT NULL,
///     imap_host VARCHAR(255) NOT NULL,
///     imap_port INTEGER NOT NULL DEFAULT 993,
///     imap_username VARCHAR(255) NOT NULL,
///     imap_password TEXT NOT NULL,
///     sync_folders JSONB NOT NULL DEFAULT '["INBOX"]',
///     status VARCHAR(16) NOT NULL DEFAULT 'active',
///     last_error TEXT,
///     last_synced_at TIMESTAMPTZ,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use uuid::Uuid;

/// Operational status of a mailbox connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailboxStatus {
    /// Connection is healthy and polled every pass
    Active,

    /// Operator-paused; skipped by the scheduler
    Paused,

    /// Last pass failed; still polled (the next pass is the retry)
    Error,
}

impl MailboxStatus {
    /// Converts status to string for database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            MailboxStatus::Active => "active",
            MailboxStatus::Paused => "paused",
            MailboxStatus::Error => "error",
        }
    }

    /// Whether the scheduler should include this connection in a pass
    pub fn is_pollable(&self) -> bool {
        matches!(self, MailboxStatus::Active | MailboxStatus::Error)
    }

    /// Parses the stored string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(MailboxStatus::Active),
            "paused" => Some(MailboxStatus::Paused),
            "error" => Some(MailboxStatus::Error),
            _ => None,
        }
    }
}

/// Mailbox connection record
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Mailbox {
    /// Unique connection ID
    pub id: Uuid,

    /// Human-readable name shown in the product UI
    pub display_name: String,

    /// The account's own email address
    pub address: String,

    /// IMAP server host
    pub imap_host: String,

    /// IMAP server port (143 selects a plaintext connection)
    pub imap_port: i32,

    /// IMAP login username
    pub imap_username: String,

    /// IMAP login password
    pub imap_password: String,

    /// Folders to sync (JSON array of strings)
    pub sync_folders: JsonValue,

    /// Current status string ("active", "paused", "error")
    pub status: String,

    /// Failure text from the last errored pass
    pub last_error: Option<String>,

    /// When the last successful pass finished
    pub last_synced_at: Option<DateTime<Utc>>,

    /// When the connection was created
    pub created_at: DateTime<Utc>,

    /// When the connection was last updated
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a mailbox connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMailbox {
    pub display_name: String,
    pub address: String,
    pub imap_host: String,
    pub imap_port: i32,
    pub imap_username: String,
    pub imap_password: String,

    /// Folders to sync; defaults to `["INBOX"]`
    #[serde(default = "default_sync_folders")]
    pub sync_folders: JsonValue,
}

fn default_sync_folders() -> JsonValue {
    serde_json::json!(["INBOX"])
}

impl Mailbox {
    /// Creates a new mailbox connection in active status
    pub async fn create(pool: &PgPool, data: CreateMailbox) -> Result<Self, sqlx::Error> {
        let mailbox = sqlx::query_as::<_, Mailbox>(
            r#"
            INSERT INTO mailboxes (display_name, address, imap_host, imap_port,
                                   imap_username, imap_password, sync_folders)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, display_name, address, imap_host, imap_port, imap_username,
                      imap_password, sync_folders, status, last_error, last_synced_at,
                      created_at, updated_at
            "#,
        )
        .bind(data.display_name)
        .bind(data.address)
        .bind(data.imap_host)
        .bind(data.imap_port)
        .bind(data.imap_username)
        .bind(data.imap_password)
        .bind(data.sync_folders)
        .fetch_one(pool)
        .await?;

        Ok(mailbox)
    }

    /// Finds a mailbox connection by ID
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let mailbox = sqlx::query_as::<_, Mailbox>(
            r#"
            SELECT id, display_name, address, imap_host, imap_port, imap_username,
                   imap_password, sync_folders, status, last_error, last_synced_at,
                   created_at, updated_at
            FROM mailboxes
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(mailbox)
    }

    /// Lists connections the scheduler should poll this pass
    ///
    /// Paused connections are excluded; errored ones are not, since the next
    /// scheduled pass is the retry policy. The statuses bound here are
    /// exactly the ones [`MailboxStatus::is_pollable`] accepts.
    pub async fn list_pollable(pool: &PgPool) -> Result<Vec<Self>, sqlx::Error> {
        let mailboxes = sqlx::query_as::<_, Mailbox>(
            r#"
            SELECT id, display_name, address, imap_host, imap_port, imap_username,
                   imap_password, sync_folders, status, last_error, last_synced_at,
                   created_at, updated_at
            FROM mailboxes
            WHERE status IN ($1, $2)
            ORDER BY created_at ASC
            "#,
        )
        .bind(MailboxStatus::Active.as_str())
        .bind(MailboxStatus::Error.as_str())
        .fetch_all(pool)
        .await?;

        Ok(mailboxes)
    }

    /// Records a successful pass: clears any error and stamps last_synced_at
    pub async fn mark_synced(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE mailboxes
            SET status = $2,
                last_error = NULL,
                last_synced_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(MailboxStatus::Active.as_str())
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Records a failed pass without taking the connection out of rotation
    pub async fn mark_error(pool: &PgPool, id: Uuid, error: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE mailboxes
            SET status = $3,
                last_error = $2,
                updated_at = NOW()
            WHERE id = $1 AND status <> $4
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(MailboxStatus::Error.as_str())
        .bind(MailboxStatus::Paused.as_str())
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Pauses a connection (operator action; skipped by the scheduler)
    pub async fn pause(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE mailboxes SET status = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(MailboxStatus::Paused.as_str())
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Resumes a paused connection
    pub async fn resume(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE mailboxes
            SET status = $2, last_error = NULL, updated_at = NOW()
            WHERE id = $1 AND status = $3
            "#,
        )
        .bind(id)
        .bind(MailboxStatus::Active.as_str())
        .bind(MailboxStatus::Paused.as_str())
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// The stored status string in its enum form
    pub fn parsed_status(&self) -> Option<MailboxStatus> {
        MailboxStatus::parse(&self.status)
    }

    /// The configured folder list, defaulting to INBOX when the stored JSON
    /// is empty or malformed
    pub fn folders(&self) -> Vec<String> {
        let parsed: Option<Vec<String>> =
            serde_json::from_value(self.sync_folders.clone()).ok();
        match parsed {
            Some(folders) if !folders.is_empty() => folders,
            _ => vec!["INBOX".to_string()],
        }
    }

    /// Whether port 143 was configured, i.e. a plaintext connection
    pub fn uses_plaintext(&self) -> bool {
        self.imap_port == 143
    }
}

/// Per-folder sync cursor
///
/// `last_uid` is the highest UID already persisted for the folder;
/// `uid_validity` pins the UID space it belongs to. A UIDVALIDITY change on
/// the server means every stored UID is void and the folder re-syncs from
/// UID 1.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MailboxCursor {
    pub mailbox_id: Uuid,
    pub folder: String,
    pub uid_validity: i64,
    pub last_uid: i64,
    pub updated_at: DateTime<Utc>,
}

impl MailboxCursor {
    /// Loads the cursor for a folder; absent rows read as the zero cursor
    pub async fn get(
        pool: &PgPool,
        mailbox_id: Uuid,
        folder: &str,
    ) -> Result<(i64, i64), sqlx::Error> {
        let cursor = sqlx::query_as::<_, MailboxCursor>(
            r#"
            SELECT mailbox_id, folder, uid_validity, last_uid, updated_at
            FROM mailbox_cursors
            WHERE mailbox_id = $1 AND folder = $2
            "#,
        )
        .bind(mailbox_id)
        .bind(folder)
        .fetch_optional(pool)
        .await?;

        Ok(cursor
            .map(|c| (c.uid_validity, c.last_uid))
            .unwrap_or((0, 0)))
    }

    /// Advances the cursor, creating the row on first contact with a folder
    ///
    /// `last_uid` never moves backwards here; a UIDVALIDITY reset goes
    /// through [`MailboxCursor::reset`] instead.
    pub async fn advance(
        pool: &PgPool,
        mailbox_id: Uuid,
        folder: &str,
        uid_validity: i64,
        last_uid: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO mailbox_cursors (mailbox_id, folder, uid_validity, last_uid)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (mailbox_id, folder) DO UPDATE SET
                uid_validity = EXCLUDED.uid_validity,
                last_uid = GREATEST(mailbox_cursors.last_uid, EXCLUDED.last_uid),
                updated_at = NOW()
            "#,
        )
        .bind(mailbox_id)
        .bind(folder)
        .bind(uid_validity)
        .bind(last_uid)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Resets the cursor after a UIDVALIDITY change
    pub async fn reset(
        pool: &PgPool,
        mailbox_id: Uuid,
        folder: &str,
        uid_validity: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO mailbox_cursors (mailbox_id, folder, uid_validity, last_uid)
            VALUES ($1, $2, $3, 0)
            ON CONFLICT (mailbox_id, folder) DO UPDATE SET
                uid_validity = EXCLUDED.uid_validity,
                last_uid = 0,
                updated_at = NOW()
            "#,
        )
        .bind(mailbox_id)
        .bind(folder)
        .bind(uid_validity)
        .execute(pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mailbox_status_as_str() {
        assert_eq!(MailboxStatus::Active.as_str(), "active");
        assert_eq!(MailboxStatus::Paused.as_str(), "paused");
        assert_eq!(MailboxStatus::Error.as_str(), "error");
    }

    #[test]
    fn test_mailbox_status_parse_round_trip() {
        for status in [
            MailboxStatus::Active,
            MailboxStatus::Paused,
            MailboxStatus::Error,
        ] {
            assert_eq!(MailboxStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(MailboxStatus::parse("deleted"), None);
    }

    #[test]
    fn test_mailbox_status_is_pollable() {
        assert!(MailboxStatus::Active.is_pollable());
        assert!(MailboxStatus::Error.is_pollable());
        assert!(!MailboxStatus::Paused.is_pollable());
    }

    #[test]
    fn test_folders_default_to_inbox() {
        let mut mailbox = sample_mailbox();
        mailbox.sync_folders = serde_json::json!([]);
        assert_eq!(mailbox.folders(), vec!["INBOX".to_string()]);

        mailbox.sync_folders = serde_json::json!("not-a-list");
        assert_eq!(mailbox.folders(), vec!["INBOX".to_string()]);

        mailbox.sync_folders = serde_json::json!(["INBOX", "Archive"]);
        assert_eq!(
            mailbox.folders(),
            vec!["INBOX".to_string(), "Archive".to_string()]
        );
    }

    #[test]
    fn test_uses_plaintext_only_on_143() {
        let mut mailbox = sample_mailbox();
        assert!(!mailbox.uses_plaintext());
        mailbox.imap_port = 143;
        assert!(mailbox.uses_plaintext());
    }

    fn sample_mailbox() -> Mailbox {
        Mailbox {
            id: Uuid::new_v4(),
            display_name: "Work".to_string(),
            address: "user@example.com".to_string(),
            imap_host: "imap.example.com".to_string(),
            imap_port: 993,
            imap_username: "user@example.com".to_string(),
            imap_password: "secret".to_string(),
            sync_folders: serde_json::json!(["INBOX"]),
            status: "active".to_string(),
            last_error: None,
            last_synced_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    // CRUD and cursor behavior against a live database are covered in tests/.
}
