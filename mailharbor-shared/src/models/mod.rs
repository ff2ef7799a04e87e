/// Database models
///
/// # Models
///
/// - `mailbox`: external mailbox connections and their per-folder sync
///   cursors
/// - `message`: synced message metadata (bodies live in object storage)
/// - `outbox`: queued outbound sends drained by the worker

pub mod mailbox;
pub mod message;
pub mod outbox;
