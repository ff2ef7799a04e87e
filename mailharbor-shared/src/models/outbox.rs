/// Outbox model
///
/// Outbound sends queued by the web tier and drained by the sync worker.
/// Rows hold a fully-formed message: recipients, subject, bodies, optional
/// threading headers, and attachment pointers into object storage.
///
/// # State Machine
///
/// ```text
/// pending → sending → sent
///                   → failed
/// ```
///
/// The worker claims `pending` rows atomically (`FOR UPDATE SKIP LOCKED`),
/// so two workers never relay the same row. On success the row keeps the
/// generated Message-ID as its delivery identifier.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use uuid::Uuid;

/// Delivery state of an outbox row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxState {
    /// Waiting to be claimed by a worker
    Pending,

    /// Claimed; relay in progress
    Sending,

    /// Accepted by the SMTP relay
    Sent,

    /// Relay rejected the message or building it failed
    Failed,
}

impl OutboxState {
    /// Converts state to string for database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxState::Pending => "pending",
            OutboxState::Sending => "sending",
            OutboxState::Sent => "sent",
            OutboxState::Failed => "failed",
        }
    }

    /// Checks if state is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, OutboxState::Sent | OutboxState::Failed)
    }

    /// Checks if transition to target state is valid
    pub fn can_transition_to(&self, target: OutboxState) -> bool {
        matches!(
            (self, target),
            (OutboxState::Pending, OutboxState::Sending)
                | (OutboxState::Sending, OutboxState::Sent)
                | (OutboxState::Sending, OutboxState::Failed)
        )
    }

    /// Parses the stored string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OutboxState::Pending),
            "sending" => Some(OutboxState::Sending),
            "sent" => Some(OutboxState::Sent),
            "failed" => Some(OutboxState::Failed),
            _ => None,
        }
    }
}

/// Attachment pointer carried on an outbox row
///
/// The bytes themselves are uploaded to object storage by whoever enqueued
/// the send; the worker loads them by key while building the MIME message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxAttachment {
    pub filename: String,
    pub content_type: String,
    pub blob_key: String,
}

/// Queued outbound message
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OutboxMessage {
    /// Unique row ID
    pub id: Uuid,

    /// Sending mailbox connection (supplies the From address)
    pub mailbox_id: Uuid,

    /// Current delivery state string
    pub state: String,

    /// To recipients (JSON array of address strings)
    pub to_addresses: JsonValue,

    /// Cc recipients
    pub cc_addresses: JsonValue,

    /// Bcc recipients
    pub bcc_addresses: JsonValue,

    /// Subject line
    pub subject: String,

    /// Plain-text body
    pub text_body: String,

    /// Optional HTML alternative
    pub html_body: Option<String>,

    /// In-Reply-To header for threaded replies
    pub in_reply_to: Option<String>,

    /// References header chain (JSON array of message-ids)
    pub reference_ids: JsonValue,

    /// Attachment pointers (JSON array of [`OutboxAttachment`])
    pub attachments: JsonValue,

    /// Delivery identifier assigned on successful relay
    pub message_id: Option<String>,

    /// Failure text when state is `failed`
    pub error: Option<String>,

    /// Relay attempts so far
    pub attempts: i32,

    /// When the send was enqueued
    pub created_at: DateTime<Utc>,

    /// When the relay accepted the message
    pub sent_at: Option<DateTime<Utc>>,
}

/// Input for enqueueing a send
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOutboxMessage {
    pub mailbox_id: Uuid,
    pub to_addresses: JsonValue,
    #[serde(default = "empty_list")]
    pub cc_addresses: JsonValue,
    #[serde(default = "empty_list")]
    pub bcc_addresses: JsonValue,
    pub subject: String,
    pub text_body: String,
    pub html_body: Option<String>,
    pub in_reply_to: Option<String>,
    #[serde(default = "empty_list")]
    pub reference_ids: JsonValue,
    #[serde(default = "empty_list")]
    pub attachments: JsonValue,
}

fn empty_list() -> JsonValue {
    serde_json::json!([])
}

const OUTBOX_COLUMNS: &str = r#"id, mailbox_id, state, to_addresses, cc_addresses, bcc_addresses,
           subject, text_body, html_body, in_reply_to, reference_ids, attachments,
           message_id, error, attempts, created_at, sent_at"#;

impl OutboxMessage {
    /// Enqueues a send in pending state
    pub async fn enqueue(pool: &PgPool, data: CreateOutboxMessage) -> Result<Self, sqlx::Error> {
        let message = sqlx::query_as::<_, OutboxMessage>(&format!(
            r#"
            INSERT INTO outbox_messages (mailbox_id, to_addresses, cc_addresses, bcc_addresses,
                                         subject, text_body, html_body, in_reply_to,
                                         reference_ids, attachments)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {OUTBOX_COLUMNS}
            "#
        ))
        .bind(data.mailbox_id)
        .bind(data.to_addresses)
        .bind(data.cc_addresses)
        .bind(data.bcc_addresses)
        .bind(data.subject)
        .bind(data.text_body)
        .bind(data.html_body)
        .bind(data.in_reply_to)
        .bind(data.reference_ids)
        .bind(data.attachments)
        .fetch_one(pool)
        .await?;

        Ok(message)
    }

    /// Finds an outbox row by ID
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let message = sqlx::query_as::<_, OutboxMessage>(&format!(
            r#"
            SELECT {OUTBOX_COLUMNS}
            FROM outbox_messages
            WHERE id = $1
            "#
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(message)
    }

    /// The stored state string in its enum form
    pub fn parsed_state(&self) -> Option<OutboxState> {
        OutboxState::parse(&self.state)
    }

    /// Parses the attachment pointer list off the row
    pub fn attachment_list(&self) -> Vec<OutboxAttachment> {
        serde_json::from_value(self.attachments.clone()).unwrap_or_default()
    }

    /// Parses a JSON address column into strings
    pub fn address_list(value: &JsonValue) -> Vec<String> {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }
}
