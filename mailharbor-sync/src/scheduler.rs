/// Sync scheduler
///
/// The main worker loop. One cooperative worker wakes once per fixed
/// interval, runs a single sync pass over every pollable mailbox connection
/// sequentially, drains the outbox, and goes back to sleep. Sleeping happens
/// in one-second increments so a shutdown signal never waits out the full
/// interval.
///
/// # Error policy
///
/// Anything that fails inside a pass is logged and swallowed here; the next
/// scheduled pass is the retry. A failure on one mailbox is isolated: it is
/// recorded on that connection and the pass moves on to the rest.
///
/// ```text
/// SyncScheduler
///   ├─> Mailbox::list_pollable: connections for this pass
///   ├─> sync::sync_mailbox:     one connection at a time
///   ├─> OutboxQueue:            claim pending sends
///   └─> SmtpRelay:              relay each send
/// ```

use std::sync::Arc;
use std::time::Instant;

use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

use mailharbor_shared::models::mailbox::Mailbox;
use mailharbor_shared::models::outbox::OutboxMessage;
use mailharbor_shared::storage::BlobStore;
use sqlx::PgPool;

use crate::outbox::OutboxQueue;
use crate::relay::{OutgoingAttachment, OutgoingMessage, SmtpRelay};
use crate::sync::{sync_mailbox, SyncLimits};

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Seconds between sync passes
    pub poll_interval_secs: u64,

    /// UIDs per IMAP FETCH round trip
    pub fetch_batch_size: usize,

    /// Raw bodies above this many bytes are not parsed or stored
    pub body_size_limit: usize,

    /// Outbox rows claimed per pass
    pub outbox_batch_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            poll_interval_secs: 300,
            fetch_batch_size: 50,
            body_size_limit: 50 * 1024 * 1024,
            outbox_batch_size: 25,
        }
    }
}

/// What one full pass accomplished
#[derive(Debug, Clone, Copy, Default)]
pub struct PassOutcome {
    pub mailboxes_synced: usize,
    pub mailboxes_failed: usize,
    pub messages_fetched: usize,
    pub sends_relayed: usize,
    pub sends_failed: usize,
}

/// The long-running sync worker
pub struct SyncScheduler {
    db: PgPool,
    store: Arc<dyn BlobStore>,
    relay: SmtpRelay,
    outbox: OutboxQueue,
    config: SchedulerConfig,
    shutdown_token: CancellationToken,
}

impl SyncScheduler {
    /// Creates a scheduler over the given pool, blob store, and relay
    pub fn new(
        db: PgPool,
        store: Arc<dyn BlobStore>,
        relay: SmtpRelay,
        config: SchedulerConfig,
    ) -> Self {
        let outbox = OutboxQueue::with_batch_size(db.clone(), config.outbox_batch_size);

        SyncScheduler {
            db,
            store,
            relay,
            outbox,
            config,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Token external handlers cancel to request graceful shutdown
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Runs passes until shutdown is requested
    ///
    /// The current pass is allowed to finish its current mailbox; no new
    /// mailboxes or passes start after cancellation.
    pub async fn run(&self) -> anyhow::Result<()> {
        tracing::info!(
            poll_interval_secs = self.config.poll_interval_secs,
            "Sync scheduler starting"
        );

        loop {
            if self.shutdown_token.is_cancelled() {
                break;
            }

            let started = Instant::now();
            match self.run_pass().await {
                Ok(outcome) => {
                    tracing::info!(
                        mailboxes_synced = outcome.mailboxes_synced,
                        mailboxes_failed = outcome.mailboxes_failed,
                        messages_fetched = outcome.messages_fetched,
                        sends_relayed = outcome.sends_relayed,
                        sends_failed = outcome.sends_failed,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Sync pass complete"
                    );
                }
                Err(e) => {
                    // Swallowed on purpose: the next pass is the retry.
                    tracing::error!(error = %e, "Sync pass failed");
                }
            }

            self.sleep_until_next_pass().await;
        }

        tracing::info!("Sync scheduler shut down");
        Ok(())
    }

    /// One complete iteration over all pollable connections plus the outbox
    async fn run_pass(&self) -> anyhow::Result<PassOutcome> {
        let mut outcome = PassOutcome::default();

        let mailboxes = Mailbox::list_pollable(&self.db).await?;
        tracing::debug!(count = mailboxes.len(), "Starting sync pass");

        let limits = SyncLimits {
            fetch_batch_size: self.config.fetch_batch_size,
            body_size_limit: self.config.body_size_limit,
        };

        for mailbox in mailboxes {
            if self.shutdown_token.is_cancelled() {
                tracing::info!("Shutdown requested, ending pass early");
                break;
            }

            match sync_mailbox(
                &self.db,
                self.store.as_ref(),
                &mailbox,
                &limits,
                &self.shutdown_token,
            )
            .await
            {
                Ok(sync) => {
                    outcome.mailboxes_synced += 1;
                    outcome.messages_fetched += sync.messages_fetched;
                    // A status-write hiccup must not end the pass either.
                    if let Err(db_err) = Mailbox::mark_synced(&self.db, mailbox.id).await {
                        tracing::error!(
                            mailbox_id = %mailbox.id,
                            error = %db_err,
                            "Failed to record mailbox sync"
                        );
                    }
                    tracing::info!(
                        mailbox_id = %mailbox.id,
                        address = %mailbox.address,
                        folders = sync.folders_synced,
                        fetched = sync.messages_fetched,
                        "Mailbox synced"
                    );
                }
                Err(e) => {
                    // One bad connection must not take down the pass.
                    outcome.mailboxes_failed += 1;
                    tracing::error!(
                        mailbox_id = %mailbox.id,
                        address = %mailbox.address,
                        error = %e,
                        "Mailbox sync failed"
                    );
                    if let Err(db_err) =
                        Mailbox::mark_error(&self.db, mailbox.id, &e.to_string()).await
                    {
                        tracing::error!(
                            mailbox_id = %mailbox.id,
                            error = %db_err,
                            "Failed to record mailbox error"
                        );
                    }
                }
            }
        }

        if !self.shutdown_token.is_cancelled() {
            self.drain_outbox(&mut outcome).await?;
        }

        Ok(outcome)
    }

    /// Claims pending outbox rows and relays them
    async fn drain_outbox(&self, outcome: &mut PassOutcome) -> anyhow::Result<()> {
        let claimed = self.outbox.claim_pending(None).await?;

        for row in claimed {
            let row_id = row.id;
            match self.relay_row(row).await {
                Ok(message_id) => {
                    outcome.sends_relayed += 1;
                    if let Err(db_err) = self.outbox.mark_sent(row_id, &message_id).await {
                        tracing::error!(
                            outbox_id = %row_id,
                            error = %db_err,
                            "Failed to record relayed send"
                        );
                    }
                }
                Err(e) => {
                    // A refused send stays in the pass; the row records why.
                    outcome.sends_failed += 1;
                    if let Err(db_err) = self.outbox.mark_failed(row_id, &e.to_string()).await {
                        tracing::error!(
                            outbox_id = %row_id,
                            error = %db_err,
                            "Failed to record send failure"
                        );
                    }
                }
            }
        }

        Ok(())
    }

    /// Builds and relays one claimed outbox row, returning the delivery id
    async fn relay_row(&self, row: OutboxMessage) -> anyhow::Result<String> {
        let mailbox = Mailbox::find_by_id(&self.db, row.mailbox_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("sender mailbox {} no longer exists", row.mailbox_id))?;

        let from = if mailbox.display_name.is_empty() {
            mailbox.address.clone()
        } else {
            format!("{} <{}>", mailbox.display_name, mailbox.address)
        };

        let mut attachments = Vec::new();
        for pointer in row.attachment_list() {
            let data = self.store.get(&pointer.blob_key).await?;
            attachments.push(OutgoingAttachment {
                filename: pointer.filename,
                content_type: pointer.content_type,
                data: data.to_vec(),
            });
        }

        let outgoing = OutgoingMessage {
            from,
            to: OutboxMessage::address_list(&row.to_addresses),
            cc: OutboxMessage::address_list(&row.cc_addresses),
            bcc: OutboxMessage::address_list(&row.bcc_addresses),
            subject: row.subject,
            text_body: row.text_body,
            html_body: row.html_body,
            attachments,
            in_reply_to: row.in_reply_to,
            references: OutboxMessage::address_list(&row.reference_ids),
        };

        let receipt = self.relay.send(outgoing).await?;
        Ok(receipt.message_id)
    }

    /// Sleeps out the polling interval in one-second increments
    async fn sleep_until_next_pass(&self) {
        let mut remaining = self.config.poll_interval_secs;
        while remaining > 0 {
            if self.shutdown_token.is_cancelled() {
                return;
            }
            sleep(Duration::from_secs(1)).await;
            remaining -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_config_default() {
        let config = SchedulerConfig::default();
        assert_eq!(config.poll_interval_secs, 300);
        assert_eq!(config.fetch_batch_size, 50);
        assert_eq!(config.body_size_limit, 50 * 1024 * 1024);
        assert_eq!(config.outbox_batch_size, 25);
    }

    // Pass behavior against live services is observed in staging; the
    // pieces it coordinates are covered by their own tests.
}
