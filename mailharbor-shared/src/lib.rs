//! # Mailharbor Shared Library
//!
//! Shared types and persistence used by the Mailharbor sync worker (and by
//! the rest of the platform, which is out of scope for this repository).
//!
//! ## Module Organization
//!
//! - `db`: PostgreSQL pool and embedded migrations
//! - `models`: mailbox connections, message metadata, outbox rows
//! - `storage`: object storage for raw message bodies

pub mod db;
pub mod models;
pub mod storage;

/// Current version of the Mailharbor shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
