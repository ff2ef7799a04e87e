/// Configuration management for the sync worker
///
/// Loads everything from environment variables into typed config structs.
///
/// # Environment Variables
///
/// - `DATABASE_URL`: PostgreSQL connection string (required)
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default: 10)
/// - `SYNC_INTERVAL_SECONDS`: seconds between passes (default: 300)
/// - `SYNC_FETCH_BATCH_SIZE`: UIDs per IMAP FETCH (default: 50)
/// - `SYNC_BODY_SIZE_LIMIT`: body byte cap (default: 52428800)
/// - `STORAGE_BUCKET`: object storage bucket (required)
/// - `STORAGE_ENDPOINT_URL`: custom endpoint for R2/S3-compatibles
/// - `STORAGE_REGION`: region, "auto" for R2 (default: auto)
/// - `SMTP_HOST`: outbound relay host (required)
/// - `SMTP_PORT`: relay port; 465 selects implicit TLS (default: 587)
/// - `SMTP_USERNAME`, `SMTP_PASSWORD`: relay credentials
/// - `RUST_LOG`: log filter (default: mailharbor_sync=info)

use std::env;
use std::fmt::Display;
use std::str::FromStr;

use mailharbor_shared::db::pool::DatabaseConfig;
use mailharbor_shared::storage::StorageConfig;

use crate::relay::RelayConfig;
use crate::scheduler::SchedulerConfig;

/// Complete worker configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database pool configuration
    pub database: DatabaseConfig,

    /// Scheduler loop configuration
    pub scheduler: SchedulerConfig,

    /// Object storage configuration
    pub storage: StorageConfig,

    /// SMTP relay configuration
    pub relay: RelayConfig,
}

impl Config {
    /// Loads configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error when a required variable is missing or a numeric
    /// variable fails to parse.
    pub fn from_env() -> anyhow::Result<Self> {
        // Load .env if present (development convenience).
        dotenvy::dotenv().ok();

        let database_url = require_var("DATABASE_URL")?;
        let max_connections = parse_var("DATABASE_MAX_CONNECTIONS", 10u32)?;

        let scheduler = SchedulerConfig {
            poll_interval_secs: parse_var("SYNC_INTERVAL_SECONDS", 300u64)?,
            fetch_batch_size: parse_var("SYNC_FETCH_BATCH_SIZE", 50usize)?,
            body_size_limit: parse_var("SYNC_BODY_SIZE_LIMIT", 50 * 1024 * 1024usize)?,
            outbox_batch_size: parse_var("SYNC_OUTBOX_BATCH_SIZE", 25usize)?,
        };

        let storage = StorageConfig {
            bucket: require_var("STORAGE_BUCKET")?,
            endpoint_url: env::var("STORAGE_ENDPOINT_URL").ok(),
            region: env::var("STORAGE_REGION").unwrap_or_else(|_| "auto".to_string()),
        };

        let relay = RelayConfig {
            host: require_var("SMTP_HOST")?,
            port: parse_var("SMTP_PORT", 587u16)?,
            username: env::var("SMTP_USERNAME").unwrap_or_default(),
            password: env::var("SMTP_PASSWORD").unwrap_or_default(),
        };

        Ok(Self {
            database: DatabaseConfig {
                url: database_url,
                max_connections,
                ..Default::default()
            },
            scheduler,
            storage,
            relay,
        })
    }
}

fn require_var(name: &str) -> anyhow::Result<String> {
    env::var(name).map_err(|_| anyhow::anyhow!("{} environment variable is required", name))
}

fn parse_var<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{} is invalid: {}", name, e)),
        Err(_) => Ok(default),
    }
}
