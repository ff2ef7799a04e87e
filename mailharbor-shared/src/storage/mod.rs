/// Object storage for raw message bodies
///
/// Bodies are too large for comfortable relational rows, so the metadata
/// table holds only a key into a write-once blob store. The production
/// backend is any S3-compatible store (the product runs against Cloudflare
/// R2 through a custom endpoint URL); tests use the in-memory
/// implementation.
///
/// Keys are derived from the body content, so storing the same body twice
/// lands on the same key and the write stays idempotent.

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Object storage error
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Requested key does not exist
    #[error("blob not found: {0}")]
    NotFound(String),

    /// A different body was already stored under this key
    #[error("write-once violation for key: {0}")]
    WriteConflict(String),

    /// Backend failure (network, auth, bucket config)
    #[error("object storage error: {0}")]
    Backend(String),
}

/// Write-once blob store contract
///
/// `put` with a key that already holds the same bytes is a no-op; storing
/// different bytes under an existing key is a conflict.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores a blob under the given key
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<(), StorageError>;

    /// Loads a blob by key
    async fn get(&self, key: &str) -> Result<Bytes, StorageError>;

    /// Checks whether a key exists
    async fn exists(&self, key: &str) -> Result<bool, StorageError>;
}

/// Generates the storage key for a raw message body
///
/// The key embeds the owning mailbox and a content digest:
/// `bodies/{mailbox_id}/{sha256[..32]}.eml`. Identical bodies map to the
/// same key, which is what makes re-syncing a message idempotent at the
/// storage layer.
pub fn body_key(mailbox_id: Uuid, raw: &[u8]) -> String {
    let digest = hex::encode(Sha256::digest(raw));
    format!("bodies/{}/{}.eml", mailbox_id, &digest[..32])
}

/// Configuration for the S3-compatible store
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Bucket name
    pub bucket: String,

    /// Custom endpoint URL (set for R2 and other S3-compatibles)
    pub endpoint_url: Option<String>,

    /// Region; R2 expects "auto"
    pub region: String,
}

/// S3-compatible blob store
///
/// Credentials come from the standard AWS environment variables
/// (`AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY`), which is how R2 API
/// tokens are surfaced too.
pub struct S3BlobStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3BlobStore {
    /// Builds the client from environment credentials and the given config
    pub async fn connect(config: StorageConfig) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()));

        if let Some(endpoint) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint.clone());
        }

        let shared = loader.load().await;

        S3BlobStore {
            client: aws_sdk_s3::Client::new(&shared),
            bucket: config.bucket,
        }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<(), StorageError> {
        debug!(key, size = bytes.len(), "Storing blob");

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| StorageError::Backend(e.into_service_error().to_string()))?;

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let service = e.into_service_error();
                if service.is_no_such_key() {
                    StorageError::NotFound(key.to_string())
                } else {
                    StorageError::Backend(service.to_string())
                }
            })?;

        let data = object
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(data.into_bytes())
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                let service = e.into_service_error();
                if service.is_not_found() {
                    Ok(false)
                } else {
                    Err(StorageError::Backend(service.to_string()))
                }
            }
        }
    }
}

/// In-memory blob store for tests
///
/// Unlike S3, this one actually enforces the write-once contract, which
/// catches key-collision bugs the production store would silently absorb.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Bytes>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs
    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, bytes: Bytes, _content_type: &str) -> Result<(), StorageError> {
        let mut blobs = self.blobs.write().await;
        if let Some(existing) = blobs.get(key) {
            if existing != &bytes {
                return Err(StorageError::WriteConflict(key.to_string()));
            }
            return Ok(());
        }
        blobs.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        self.blobs
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.blobs.read().await.contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_key_is_deterministic() {
        let mailbox_id = Uuid::new_v4();
        let raw = b"From: a@example.com\r\n\r\nhello";

        let key_a = body_key(mailbox_id, raw);
        let key_b = body_key(mailbox_id, raw);
        assert_eq!(key_a, key_b);
        assert!(key_a.starts_with(&format!("bodies/{}/", mailbox_id)));
        assert!(key_a.ends_with(".eml"));
    }

    #[test]
    fn test_body_key_differs_by_content_and_mailbox() {
        let mailbox_id = Uuid::new_v4();
        let key_a = body_key(mailbox_id, b"one");
        let key_b = body_key(mailbox_id, b"two");
        assert_ne!(key_a, key_b);

        let other_mailbox = Uuid::new_v4();
        assert_ne!(body_key(mailbox_id, b"one"), body_key(other_mailbox, b"one"));
    }

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryBlobStore::new();
        assert!(store.is_empty().await);

        store
            .put("bodies/x/1.eml", Bytes::from_static(b"raw"), "message/rfc822")
            .await
            .unwrap();

        assert!(store.exists("bodies/x/1.eml").await.unwrap());
        assert_eq!(store.get("bodies/x/1.eml").await.unwrap(), Bytes::from_static(b"raw"));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_memory_store_is_write_once() {
        let store = MemoryBlobStore::new();
        let key = "bodies/x/1.eml";

        store
            .put(key, Bytes::from_static(b"raw"), "message/rfc822")
            .await
            .unwrap();

        // Same content: idempotent no-op.
        store
            .put(key, Bytes::from_static(b"raw"), "message/rfc822")
            .await
            .unwrap();

        // Different content: conflict.
        let err = store
            .put(key, Bytes::from_static(b"other"), "message/rfc822")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::WriteConflict(_)));
    }

    #[tokio::test]
    async fn test_memory_store_missing_key() {
        let store = MemoryBlobStore::new();
        let err = store.get("bodies/missing").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
        assert!(!store.exists("bodies/missing").await.unwrap());
    }
}
