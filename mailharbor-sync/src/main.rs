//! # Mailharbor Sync Worker
//!
//! Standalone long-running process that keeps configured mailboxes in sync:
//! polls each connection over IMAP on a fixed interval, persists message
//! metadata to Postgres, stores raw bodies in object storage, and relays
//! queued outbound sends over SMTP.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p mailharbor-sync
//! ```
//!
//! Configuration comes entirely from environment variables; see
//! [`config::Config`]. SIGINT/SIGTERM trigger a graceful shutdown: the
//! current pass finishes its mailbox, no new passes start.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mailharbor_shared::db::{migrations, pool};
use mailharbor_shared::storage::S3BlobStore;
use mailharbor_sync::config::Config;
use mailharbor_sync::relay::SmtpRelay;
use mailharbor_sync::scheduler::SyncScheduler;
use mailharbor_sync::shutdown;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mailharbor_sync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        "Mailharbor sync worker v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    let config = Config::from_env()?;

    let db = pool::create_pool(config.database.clone()).await?;
    migrations::run_migrations(&db).await?;

    let store = Arc::new(S3BlobStore::connect(config.storage.clone()).await);
    let relay = SmtpRelay::connect(&config.relay)?;

    let scheduler = SyncScheduler::new(db.clone(), store, relay, config.scheduler.clone());
    let _watcher = shutdown::spawn_watcher(scheduler.shutdown_token());

    scheduler.run().await?;

    pool::close_pool(db).await;
    tracing::info!("Shutdown complete");

    Ok(())
}
