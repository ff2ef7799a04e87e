/// IMAP session handling
///
/// Thin wrapper over async-imap covering exactly what a sync pass needs:
/// login, folder listing, SELECT (for UIDVALIDITY/UIDNEXT), UID search above
/// a cursor, batched envelope fetches, and non-destructive raw body fetches
/// with BODY.PEEK[].
///
/// Port 143 connects in plaintext; every other port gets implicit TLS. Both
/// variants hide behind [`ImapSession`] so the sync code never branches on
/// transport.

use async_imap::types::Flag;
use async_imap::Session;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio_native_tls::native_tls::TlsConnector;
use tokio_native_tls::TlsStream;
use tracing::debug;

use mailharbor_shared::models::mailbox::Mailbox;

use crate::message::decode_header_bytes;

/// IMAP error
#[derive(Debug, thiserror::Error)]
pub enum ImapError {
    /// TCP connect failure
    #[error("connection failed: {0}")]
    Io(#[from] std::io::Error),

    /// TLS handshake or connector setup failure
    #[error("TLS failed: {0}")]
    Tls(#[from] tokio_native_tls::native_tls::Error),

    /// Server rejected the credentials
    #[error("login rejected: {0}")]
    Login(String),

    /// Any other protocol-level failure
    #[error("protocol error: {0}")]
    Protocol(#[from] async_imap::error::Error),
}

/// Folder state reported by SELECT
#[derive(Debug, Clone, Copy)]
pub struct FolderStatus {
    /// UIDVALIDITY of the selected folder (0 when the server omits it)
    pub uid_validity: i64,

    /// Predicted next UID, when reported
    pub uid_next: Option<u32>,

    /// Number of messages in the folder
    pub exists: u32,
}

/// One message's envelope-level summary from a FETCH
#[derive(Debug, Clone)]
pub struct MessageSummary {
    pub uid: u32,
    pub subject: String,
    pub sender: String,
    pub internal_date: Option<DateTime<Utc>>,
    pub is_read: bool,
    pub is_starred: bool,
    pub labels: Vec<String>,
    pub size_bytes: Option<u32>,
}

type PlainSession = Session<TcpStream>;
type TlsSession = Session<TlsStream<TcpStream>>;

enum SessionKind {
    Plain(PlainSession),
    Tls(TlsSession),
}

/// Dispatches one body expression over both transport variants.
macro_rules! with_session {
    ($self:expr, $s:ident => $body:expr) => {
        match &mut $self.inner {
            SessionKind::Plain($s) => $body,
            SessionKind::Tls($s) => $body,
        }
    };
}

/// An authenticated IMAP session for one mailbox connection
pub struct ImapSession {
    inner: SessionKind,
}

impl ImapSession {
    /// Connects and logs in with the connection's stored credentials
    ///
    /// # Errors
    ///
    /// Login rejection is reported as [`ImapError::Login`], distinct from
    /// transport failures, so callers can surface bad credentials to the
    /// operator.
    pub async fn connect(mailbox: &Mailbox) -> Result<Self, ImapError> {
        let addr = (mailbox.imap_host.as_str(), mailbox.imap_port as u16);

        let inner = if mailbox.uses_plaintext() {
            let tcp = TcpStream::connect(addr).await?;
            let client = async_imap::Client::new(tcp);
            let session = client
                .login(&mailbox.imap_username, &mailbox.imap_password)
                .await
                .map_err(|(e, _)| ImapError::Login(e.to_string()))?;
            SessionKind::Plain(session)
        } else {
            let tcp = TcpStream::connect(addr).await?;
            let tls = TlsConnector::builder().build()?;
            let tls = tokio_native_tls::TlsConnector::from(tls);
            let stream = tls.connect(&mailbox.imap_host, tcp).await?;
            let client = async_imap::Client::new(stream);
            let session = client
                .login(&mailbox.imap_username, &mailbox.imap_password)
                .await
                .map_err(|(e, _)| ImapError::Login(e.to_string()))?;
            SessionKind::Tls(session)
        };

        debug!(host = %mailbox.imap_host, port = mailbox.imap_port, "IMAP session established");
        Ok(ImapSession { inner })
    }

    /// Lists every folder the server reports
    pub async fn list_folders(&mut self) -> Result<Vec<String>, ImapError> {
        with_session!(self, s => {
            let mut names = s.list(None, Some("*")).await?;
            let mut folders = Vec::new();
            while let Some(name) = names.next().await {
                folders.push(name?.name().to_string());
            }
            drop(names);
            Ok(folders)
        })
    }

    /// Selects a folder and returns its UIDVALIDITY/UIDNEXT state
    pub async fn select(&mut self, folder: &str) -> Result<FolderStatus, ImapError> {
        let mailbox = with_session!(self, s => s.select(folder).await)?;

        Ok(FolderStatus {
            uid_validity: i64::from(mailbox.uid_validity.unwrap_or(0)),
            uid_next: mailbox.uid_next,
            exists: mailbox.exists,
        })
    }

    /// Returns UIDs strictly above the cursor, ascending
    ///
    /// A `UID n:*` search always matches at least the highest existing UID
    /// even when it is below `n`, so the filter here is not optional.
    pub async fn search_uids_above(&mut self, last_uid: u32) -> Result<Vec<u32>, ImapError> {
        let query = if last_uid == 0 {
            "UID 1:*".to_string()
        } else {
            format!("UID {}:*", last_uid.saturating_add(1))
        };

        let found = with_session!(self, s => s.uid_search(&query).await)?;

        let mut uids: Vec<u32> = found.into_iter().filter(|u| *u > last_uid).collect();
        uids.sort_unstable();
        Ok(uids)
    }

    /// Fetches envelope summaries for a UID set (comma-separated)
    pub async fn fetch_summaries(
        &mut self,
        uid_set: &str,
    ) -> Result<Vec<MessageSummary>, ImapError> {
        with_session!(self, s => {
            let mut fetches = s
                .uid_fetch(uid_set, "(UID ENVELOPE FLAGS INTERNALDATE RFC822.SIZE)")
                .await?;

            let mut out = Vec::new();
            while let Some(item) = fetches.next().await {
                let fetch = item?;
                let Some(uid) = fetch.uid else { continue };

                let envelope = fetch.envelope();
                let subject = envelope
                    .and_then(|e| e.subject.as_ref())
                    .map(|b| decode_header_bytes(b))
                    .unwrap_or_default();
                let sender = envelope
                    .and_then(|e| e.from.as_ref())
                    .and_then(|v| v.first())
                    .map(format_address)
                    .unwrap_or_default();

                let (is_read, is_starred, labels) = map_flags(fetch.flags());

                out.push(MessageSummary {
                    uid,
                    subject,
                    sender,
                    internal_date: fetch.internal_date().map(|d| d.with_timezone(&Utc)),
                    is_read,
                    is_starred,
                    labels,
                    size_bytes: fetch.size,
                });
            }
            drop(fetches);
            Ok(out)
        })
    }

    /// Fetches one full raw message with BODY.PEEK[] (does not set \Seen)
    pub async fn fetch_raw(&mut self, uid: u32) -> Result<Option<Vec<u8>>, ImapError> {
        let uid_str = uid.to_string();

        with_session!(self, s => {
            let mut fetches = s.uid_fetch(&uid_str, "(UID BODY.PEEK[])").await?;

            let mut raw = None;
            while let Some(item) = fetches.next().await {
                let fetch = item?;
                if fetch.uid == Some(uid) {
                    if let Some(body) = fetch.body() {
                        raw = Some(body.to_vec());
                    }
                }
            }
            drop(fetches);
            Ok(raw)
        })
    }

    /// Logs out; failures here are not worth surfacing
    pub async fn logout(&mut self) {
        let _ = with_session!(self, s => s.logout().await);
    }
}

/// Maps IMAP flags onto the metadata row's mutable fields
///
/// `\Seen` and `\Flagged` become is_read/is_starred; custom keywords become
/// labels. The remaining system flags carry nothing the product displays.
fn map_flags<'a>(flags: impl Iterator<Item = Flag<'a>>) -> (bool, bool, Vec<String>) {
    let mut is_read = false;
    let mut is_starred = false;
    let mut labels = Vec::new();

    for flag in flags {
        match flag {
            Flag::Seen => is_read = true,
            Flag::Flagged => is_starred = true,
            Flag::Custom(keyword) => labels.push(keyword.to_string()),
            _ => {}
        }
    }

    (is_read, is_starred, labels)
}

/// Formats an IMAP envelope address as "Name <mailbox@host>"
fn format_address(address: &async_imap::imap_proto::Address<'_>) -> String {
    let name = address
        .name
        .as_ref()
        .map(|b| decode_header_bytes(b))
        .unwrap_or_default();
    let mailbox = address
        .mailbox
        .as_ref()
        .map(|b| String::from_utf8_lossy(b).to_string())
        .unwrap_or_default();
    let host = address
        .host
        .as_ref()
        .map(|b| String::from_utf8_lossy(b).to_string())
        .unwrap_or_default();

    let mut out = String::new();
    if !name.is_empty() {
        out.push_str(&name);
        out.push(' ');
    }
    if !mailbox.is_empty() || !host.is_empty() {
        out.push('<');
        out.push_str(&mailbox);
        if !host.is_empty() {
            out.push('@');
            out.push_str(&host);
        }
        out.push('>');
    }
    out.trim().to_string()
}

/// Splits ascending UIDs into comma-separated FETCH sets of at most
/// `batch_size` entries
pub fn uid_set_batches(uids: &[u32], batch_size: usize) -> Vec<String> {
    uids.chunks(batch_size.max(1))
        .map(|chunk| {
            chunk
                .iter()
                .map(|u| u.to_string())
                .collect::<Vec<_>>()
                .join(",")
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uid_set_batches() {
        let uids = vec![1, 2, 3, 4, 5];
        assert_eq!(uid_set_batches(&uids, 2), vec!["1,2", "3,4", "5"]);
        assert_eq!(uid_set_batches(&uids, 10), vec!["1,2,3,4,5"]);
        assert!(uid_set_batches(&[], 10).is_empty());
    }

    #[test]
    fn test_uid_set_batches_zero_size_does_not_panic() {
        assert_eq!(uid_set_batches(&[7], 0), vec!["7"]);
    }

    #[test]
    fn test_map_flags() {
        let flags = vec![
            Flag::Seen,
            Flag::Custom("$Important".into()),
            Flag::Answered,
        ];
        let (is_read, is_starred, labels) = map_flags(flags.into_iter());
        assert!(is_read);
        assert!(!is_starred);
        assert_eq!(labels, vec!["$Important".to_string()]);
    }

    // Session behavior against a live IMAP server is exercised in staging;
    // there is no fake server in this repository.
}
