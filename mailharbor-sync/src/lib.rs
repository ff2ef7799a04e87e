//! # Mailharbor Sync Worker Library
//!
//! Core functionality for the mailbox synchronization worker: the scheduler
//! loop, IMAP session handling, MIME extraction, the outbound SMTP relay,
//! and the outbox queue it drains.
//!
//! ## Modules
//!
//! - `config`: environment-variable configuration
//! - `imap`: IMAP session wrapper (login, search, fetch)
//! - `message`: MIME extraction from raw bodies
//! - `outbox`: pending-send claiming and state updates
//! - `relay`: outbound SMTP transport and message assembly
//! - `scheduler`: the fixed-interval worker loop
//! - `shutdown`: OS signal handling
//! - `sync`: the per-mailbox sync pass

pub mod config;
pub mod imap;
pub mod message;
pub mod outbox;
pub mod relay;
pub mod scheduler;
pub mod shutdown;
pub mod sync;
