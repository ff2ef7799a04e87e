/// Outbox queue reader
///
/// Polls the database for pending outbound sends and claims them for relay.
/// Claiming atomically transitions rows from "pending" to "sending" under
/// `FOR UPDATE SKIP LOCKED`, so concurrent workers never relay the same row
/// twice. Marks are guarded by the same state machine the model declares:
/// a refused mark is classified through [`OutboxState::can_transition_to`].

use mailharbor_shared::models::outbox::{OutboxMessage, OutboxState};
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

/// Outbox queue error
#[derive(Debug, Error)]
pub enum OutboxQueueError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Row does not exist
    #[error("outbox row not found: {0}")]
    RowNotFound(Uuid),

    /// Row is in a state the requested mark cannot leave from
    #[error("invalid state transition for {id}: {from} -> {to}")]
    InvalidStateTransition {
        id: Uuid,
        from: &'static str,
        to: &'static str,
    },
}

/// Outbox queue reader
#[derive(Clone)]
pub struct OutboxQueue {
    db: PgPool,
    batch_size: usize,
}

impl OutboxQueue {
    /// Creates a new queue reader
    pub fn new(db: PgPool) -> Self {
        OutboxQueue { db, batch_size: 25 }
    }

    /// Creates a queue reader with a custom claim batch size
    pub fn with_batch_size(db: PgPool, batch_size: usize) -> Self {
        OutboxQueue { db, batch_size }
    }

    /// Claims pending sends for relay
    ///
    /// Transitions up to `limit` rows (default: the configured batch size)
    /// from "pending" to "sending", bumping their attempt counter, and
    /// returns them oldest first.
    pub async fn claim_pending(
        &self,
        limit: Option<usize>,
    ) -> Result<Vec<OutboxMessage>, OutboxQueueError> {
        let limit = limit.unwrap_or(self.batch_size) as i64;

        let rows = sqlx::query_as::<_, OutboxMessage>(
            r#"
            WITH pending AS (
                SELECT id
                FROM outbox_messages
                WHERE state = $2
                ORDER BY created_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE outbox_messages
            SET state = $3,
                attempts = outbox_messages.attempts + 1
            FROM pending
            WHERE outbox_messages.id = pending.id
            RETURNING outbox_messages.id, outbox_messages.mailbox_id, outbox_messages.state,
                      outbox_messages.to_addresses, outbox_messages.cc_addresses,
                      outbox_messages.bcc_addresses, outbox_messages.subject,
                      outbox_messages.text_body, outbox_messages.html_body,
                      outbox_messages.in_reply_to, outbox_messages.reference_ids,
                      outbox_messages.attachments, outbox_messages.message_id,
                      outbox_messages.error, outbox_messages.attempts,
                      outbox_messages.created_at, outbox_messages.sent_at
            "#,
        )
        .bind(limit)
        .bind(OutboxState::Pending.as_str())
        .bind(OutboxState::Sending.as_str())
        .fetch_all(&self.db)
        .await?;

        if !rows.is_empty() {
            tracing::info!(count = rows.len(), "Claimed outbox sends");
        }

        Ok(rows)
    }

    /// Marks a claimed row as sent, recording its delivery identifier
    pub async fn mark_sent(&self, id: Uuid, message_id: &str) -> Result<(), OutboxQueueError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET state = $3,
                message_id = $2,
                error = NULL,
                sent_at = NOW()
            WHERE id = $1 AND state = $4
            "#,
        )
        .bind(id)
        .bind(message_id)
        .bind(OutboxState::Sent.as_str())
        .bind(OutboxState::Sending.as_str())
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.mark_refused(id, OutboxState::Sent).await?);
        }

        tracing::info!(outbox_id = %id, message_id, "Outbox send relayed");
        Ok(())
    }

    /// Marks a claimed row as failed with the error text
    pub async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), OutboxQueueError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET state = $3,
                error = $2
            WHERE id = $1 AND state = $4
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(OutboxState::Failed.as_str())
        .bind(OutboxState::Sending.as_str())
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.mark_refused(id, OutboxState::Failed).await?);
        }

        tracing::warn!(outbox_id = %id, error, "Outbox send failed");
        Ok(())
    }

    /// Number of rows still waiting to be claimed
    pub async fn pending_count(&self) -> Result<i64, OutboxQueueError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM outbox_messages WHERE state = $1")
                .bind(OutboxState::Pending.as_str())
                .fetch_one(&self.db)
                .await?;

        Ok(count)
    }

    /// Classifies a mark that updated nothing: a row sitting in a state the
    /// transition cannot leave from, or no row at all
    async fn mark_refused(
        &self,
        id: Uuid,
        target: OutboxState,
    ) -> Result<OutboxQueueError, sqlx::Error> {
        let current = OutboxMessage::find_by_id(&self.db, id)
            .await?
            .and_then(|row| row.parsed_state());

        Ok(match current {
            Some(state) if !state.can_transition_to(target) => {
                OutboxQueueError::InvalidStateTransition {
                    id,
                    from: state.as_str(),
                    to: target.as_str(),
                }
            }
            _ => OutboxQueueError::RowNotFound(id),
        })
    }
}

#[cfg(test)]
mod tests {
    // Claim and mark semantics need a live database; they are covered in
    // tests/outbox_queue_tests.rs.
}
