/// Integration tests for mailbox connections and sync cursors
///
/// These tests require a running PostgreSQL database and skip themselves
/// when DATABASE_URL is not set.

use mailharbor_shared::db::migrations::run_migrations;
use mailharbor_shared::db::pool::{create_pool, DatabaseConfig};
use mailharbor_shared::models::mailbox::{CreateMailbox, Mailbox, MailboxCursor, MailboxStatus};
use sqlx::PgPool;
use std::env;
use uuid::Uuid;

async fn test_pool() -> Option<PgPool> {
    let Ok(url) = env::var("DATABASE_URL") else {
        eprintln!("skipping: DATABASE_URL not set");
        return None;
    };

    let pool = create_pool(DatabaseConfig {
        url,
        max_connections: 5,
        ..Default::default()
    })
    .await
    .expect("failed to connect to test database");

    run_migrations(&pool).await.expect("failed to run migrations");
    Some(pool)
}

fn sample_create() -> CreateMailbox {
    CreateMailbox {
        display_name: "Work".to_string(),
        address: format!("{}@example.com", Uuid::new_v4()),
        imap_host: "imap.example.com".to_string(),
        imap_port: 993,
        imap_username: "user".to_string(),
        imap_password: "secret".to_string(),
        sync_folders: serde_json::json!(["INBOX", "Archive"]),
    }
}

#[tokio::test]
async fn test_create_and_find() {
    let Some(pool) = test_pool().await else { return };

    let created = Mailbox::create(&pool, sample_create()).await.unwrap();
    assert_eq!(created.status, "active");
    assert_eq!(created.folders(), vec!["INBOX", "Archive"]);

    let found = Mailbox::find_by_id(&pool, created.id).await.unwrap().unwrap();
    assert_eq!(found.address, created.address);
}

#[tokio::test]
async fn test_paused_connections_are_not_polled() {
    let Some(pool) = test_pool().await else { return };

    let mailbox = Mailbox::create(&pool, sample_create()).await.unwrap();
    assert!(Mailbox::pause(&pool, mailbox.id).await.unwrap());

    let pollable = Mailbox::list_pollable(&pool).await.unwrap();
    assert!(pollable.iter().all(|m| m.id != mailbox.id));

    assert!(Mailbox::resume(&pool, mailbox.id).await.unwrap());
    let pollable = Mailbox::list_pollable(&pool).await.unwrap();
    assert!(pollable.iter().any(|m| m.id == mailbox.id));
}

#[tokio::test]
async fn test_errored_connections_stay_in_rotation() {
    let Some(pool) = test_pool().await else { return };

    let mailbox = Mailbox::create(&pool, sample_create()).await.unwrap();
    Mailbox::mark_error(&pool, mailbox.id, "login rejected").await.unwrap();

    let reloaded = Mailbox::find_by_id(&pool, mailbox.id).await.unwrap().unwrap();
    assert_eq!(reloaded.parsed_status(), Some(MailboxStatus::Error));
    assert_eq!(reloaded.last_error.as_deref(), Some("login rejected"));

    // Errored is still pollable; the next pass is the retry.
    let pollable = Mailbox::list_pollable(&pool).await.unwrap();
    assert!(pollable.iter().any(|m| m.id == mailbox.id));

    Mailbox::mark_synced(&pool, mailbox.id).await.unwrap();
    let reloaded = Mailbox::find_by_id(&pool, mailbox.id).await.unwrap().unwrap();
    assert_eq!(reloaded.parsed_status(), Some(MailboxStatus::Active));
    assert!(reloaded.last_error.is_none());
    assert!(reloaded.last_synced_at.is_some());
}

#[tokio::test]
async fn test_cursor_advances_monotonically_and_resets() {
    let Some(pool) = test_pool().await else { return };

    let mailbox = Mailbox::create(&pool, sample_create()).await.unwrap();

    // Absent cursor reads as zero.
    assert_eq!(
        MailboxCursor::get(&pool, mailbox.id, "INBOX").await.unwrap(),
        (0, 0)
    );

    MailboxCursor::advance(&pool, mailbox.id, "INBOX", 7, 100).await.unwrap();
    assert_eq!(
        MailboxCursor::get(&pool, mailbox.id, "INBOX").await.unwrap(),
        (7, 100)
    );

    // A smaller last_uid never moves the cursor backwards.
    MailboxCursor::advance(&pool, mailbox.id, "INBOX", 7, 50).await.unwrap();
    assert_eq!(
        MailboxCursor::get(&pool, mailbox.id, "INBOX").await.unwrap(),
        (7, 100)
    );

    // UIDVALIDITY rollover voids the stored UID.
    MailboxCursor::reset(&pool, mailbox.id, "INBOX", 8).await.unwrap();
    assert_eq!(
        MailboxCursor::get(&pool, mailbox.id, "INBOX").await.unwrap(),
        (8, 0)
    );

    // Folders keep independent cursors.
    MailboxCursor::advance(&pool, mailbox.id, "Archive", 3, 9).await.unwrap();
    assert_eq!(
        MailboxCursor::get(&pool, mailbox.id, "INBOX").await.unwrap(),
        (8, 0)
    );
}
