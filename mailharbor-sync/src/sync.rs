/// Per-mailbox sync pass
///
/// One connection at a time: log in, walk the configured folders, pull
/// everything above the stored UID cursor, store raw bodies in the blob
/// store, upsert metadata rows, and advance the cursor after each persisted
/// batch so an interrupted pass resumes without refetching.
///
/// # Cursor rules
///
/// The cursor is `(uid_validity, last_uid)` per folder. A UIDVALIDITY
/// mismatch voids every stored UID, so the cursor resets and the folder
/// re-syncs from UID 1. `last_uid` only ever advances otherwise.

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use mailharbor_shared::models::mailbox::{Mailbox, MailboxCursor};
use mailharbor_shared::models::message::{Message, UpsertMessage};
use mailharbor_shared::storage::{body_key, BlobStore, StorageError};
use sqlx::PgPool;

use crate::imap::{uid_set_batches, ImapError, ImapSession, MessageSummary};
use crate::message::parse_message;

/// Sync pass error
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Imap(#[from] ImapError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("object storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Tunables threaded in from the scheduler configuration
#[derive(Debug, Clone)]
pub struct SyncLimits {
    /// UIDs per FETCH round trip
    pub fetch_batch_size: usize,

    /// Bodies larger than this are not parsed or stored
    pub body_size_limit: usize,
}

/// What one mailbox pass accomplished
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOutcome {
    pub folders_synced: usize,
    pub messages_fetched: usize,
    pub bodies_stored: usize,
}

/// Whether a stored cursor is void against the server's UIDVALIDITY
///
/// A zero stored value means first contact, not a mismatch.
pub fn cursor_needs_reset(stored_validity: i64, server_validity: i64) -> bool {
    stored_validity != 0 && stored_validity != server_validity
}

/// Syncs one mailbox connection
///
/// The shutdown token is consulted between folders and between fetch
/// batches; cancellation ends the pass cleanly after the current batch.
pub async fn sync_mailbox(
    pool: &PgPool,
    store: &dyn BlobStore,
    mailbox: &Mailbox,
    limits: &SyncLimits,
    shutdown: &CancellationToken,
) -> Result<SyncOutcome, SyncError> {
    let mut session = ImapSession::connect(mailbox).await?;
    let mut outcome = SyncOutcome::default();

    let available = session.list_folders().await?;
    for folder in mailbox.folders() {
        if shutdown.is_cancelled() {
            break;
        }

        if !available.iter().any(|name| name == &folder) {
            warn!(
                mailbox_id = %mailbox.id,
                folder = %folder,
                "Configured folder not reported by server, skipping"
            );
            continue;
        }

        sync_folder(pool, store, &mut session, mailbox, &folder, limits, shutdown, &mut outcome)
            .await?;
        outcome.folders_synced += 1;
    }

    session.logout().await;
    Ok(outcome)
}

#[allow(clippy::too_many_arguments)]
async fn sync_folder(
    pool: &PgPool,
    store: &dyn BlobStore,
    session: &mut ImapSession,
    mailbox: &Mailbox,
    folder: &str,
    limits: &SyncLimits,
    shutdown: &CancellationToken,
    outcome: &mut SyncOutcome,
) -> Result<(), SyncError> {
    let status = session.select(folder).await?;
    let (stored_validity, mut last_uid) = MailboxCursor::get(pool, mailbox.id, folder).await?;

    if cursor_needs_reset(stored_validity, status.uid_validity) {
        warn!(
            mailbox_id = %mailbox.id,
            folder = %folder,
            stored_validity,
            server_validity = status.uid_validity,
            "UIDVALIDITY changed, full folder resync"
        );
        MailboxCursor::reset(pool, mailbox.id, folder, status.uid_validity).await?;
        last_uid = 0;
    }

    let new_uids = session.search_uids_above(last_uid as u32).await?;
    debug!(
        mailbox_id = %mailbox.id,
        folder = %folder,
        last_uid,
        new_count = new_uids.len(),
        exists = status.exists,
        "Folder cursor evaluated"
    );

    if new_uids.is_empty() {
        // Pin the validity on first contact even when the folder is empty.
        MailboxCursor::advance(pool, mailbox.id, folder, status.uid_validity, last_uid).await?;
        return Ok(());
    }

    for uid_set in uid_set_batches(&new_uids, limits.fetch_batch_size) {
        if shutdown.is_cancelled() {
            break;
        }

        let summaries = session.fetch_summaries(&uid_set).await?;
        let mut batch_max = last_uid;

        for summary in summaries {
            let uid = i64::from(summary.uid);
            let raw = session.fetch_raw(summary.uid).await?;

            persist_message(pool, store, mailbox, folder, summary, raw, limits, outcome).await?;

            if uid > batch_max {
                batch_max = uid;
            }
            outcome.messages_fetched += 1;
        }

        MailboxCursor::advance(pool, mailbox.id, folder, status.uid_validity, batch_max).await?;
        last_uid = batch_max;
    }

    Ok(())
}

/// Stores the body (when present and within the cap) and upserts the row
#[allow(clippy::too_many_arguments)]
async fn persist_message(
    pool: &PgPool,
    store: &dyn BlobStore,
    mailbox: &Mailbox,
    folder: &str,
    summary: MessageSummary,
    raw: Option<Vec<u8>>,
    limits: &SyncLimits,
    outcome: &mut SyncOutcome,
) -> Result<(), SyncError> {
    let mut key = None;
    let mut parsed = None;
    let mut size_bytes = summary.size_bytes.map(i64::from);

    match raw {
        Some(raw) if raw.len() <= limits.body_size_limit => {
            size_bytes = Some(raw.len() as i64);
            let blob_key = body_key(mailbox.id, &raw);
            parsed = parse_message(&raw);

            store
                .put(&blob_key, Bytes::from(raw), "message/rfc822")
                .await?;
            outcome.bodies_stored += 1;
            key = Some(blob_key);
        }
        Some(raw) => {
            warn!(
                mailbox_id = %mailbox.id,
                folder = %folder,
                uid = summary.uid,
                size = raw.len(),
                "Body exceeds size limit, storing metadata only"
            );
            size_bytes = Some(raw.len() as i64);
        }
        None => {
            debug!(
                mailbox_id = %mailbox.id,
                folder = %folder,
                uid = summary.uid,
                "Server returned no body, storing metadata only"
            );
        }
    }

    // ENVELOPE values win; the parsed body fills whatever the server left
    // blank and contributes the fields ENVELOPE cannot carry.
    let parsed = parsed.unwrap_or_default();
    let has_attachments = parsed.has_attachments();
    let subject = if summary.subject.is_empty() {
        parsed.subject.unwrap_or_default()
    } else {
        summary.subject
    };
    let sender = if summary.sender.is_empty() {
        parsed.sender.unwrap_or_default()
    } else {
        summary.sender
    };
    let internal_date = summary.internal_date.or(parsed.date);

    let row = UpsertMessage {
        mailbox_id: mailbox.id,
        folder: folder.to_string(),
        uid: i64::from(summary.uid),
        message_id: parsed.message_id,
        subject,
        sender,
        recipients: serde_json::json!(parsed.recipients),
        internal_date,
        snippet: parsed.snippet,
        is_read: summary.is_read,
        is_starred: summary.is_starred,
        labels: serde_json::json!(summary.labels),
        body_key: key,
        has_attachments,
        size_bytes,
    };

    Message::upsert(pool, row).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_needs_reset() {
        // First contact: nothing stored yet.
        assert!(!cursor_needs_reset(0, 42));

        // Unchanged validity.
        assert!(!cursor_needs_reset(42, 42));

        // Server rolled the UID space.
        assert!(cursor_needs_reset(42, 43));
    }

    #[test]
    fn test_sync_limits_are_plain_data() {
        let limits = SyncLimits {
            fetch_batch_size: 50,
            body_size_limit: 1024,
        };
        assert_eq!(limits.clone().fetch_batch_size, 50);
    }

    // Full pass behavior needs a live IMAP endpoint and database; the
    // storage and model layers it drives are covered by their own tests.
}
