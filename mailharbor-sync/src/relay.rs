/// Outbound SMTP relay
///
/// One transport for the whole service, built once at startup. Port 465
/// gets implicit TLS; anything else negotiates STARTTLS. The relay accepts
/// a fully-formed [`OutgoingMessage`] and returns a [`DeliveryReceipt`]
/// carrying the Message-ID assigned here, which is what the outbox row
/// records as its delivery identifier.

use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, Message, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use uuid::Uuid;

/// Relay error
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// A recipient or sender address did not parse
    #[error("invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),

    /// An attachment declared an unparseable content type
    #[error("invalid attachment content type: {0}")]
    InvalidContentType(String),

    /// Assembling the MIME message failed
    #[error("message build failed: {0}")]
    Build(#[from] lettre::error::Error),

    /// The SMTP server refused the message or the connection failed
    #[error("relay transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
}

/// SMTP relay configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

/// A fully-formed outbound message
#[derive(Debug, Clone, Default)]
pub struct OutgoingMessage {
    pub from: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub text_body: String,
    pub html_body: Option<String>,
    pub attachments: Vec<OutgoingAttachment>,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
}

/// Attachment bytes ready for MIME assembly
#[derive(Debug, Clone)]
pub struct OutgoingAttachment {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Result of a successful relay handoff
#[derive(Debug, Clone)]
pub struct DeliveryReceipt {
    /// Message-ID assigned to the outgoing message
    pub message_id: String,

    /// SMTP reply code from the accepting server
    pub smtp_response: String,
}

/// The service-level SMTP relay
pub struct SmtpRelay {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpRelay {
    /// Builds the transport from the relay configuration
    pub fn connect(config: &RelayConfig) -> Result<Self, RelayError> {
        let credentials = Credentials::new(config.username.clone(), config.password.clone());

        let builder = if config.port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
        };

        let transport = builder.port(config.port).credentials(credentials).build();

        Ok(SmtpRelay { transport })
    }

    /// Relays one message; returns the delivery identifier or the failure
    pub async fn send(&self, outgoing: OutgoingMessage) -> Result<DeliveryReceipt, RelayError> {
        let message_id = generate_message_id(&outgoing.from);
        let email = build_email(&outgoing, &message_id)?;

        let response = self.transport.send(email).await?;

        Ok(DeliveryReceipt {
            message_id,
            smtp_response: response.code().to_string(),
        })
    }
}

/// Generates an RFC 5322 Message-ID under the sender's domain
pub fn generate_message_id(from: &str) -> String {
    let domain = from
        .rsplit_once('@')
        .map(|(_, domain)| domain.trim_end_matches('>'))
        .filter(|d| !d.is_empty())
        .unwrap_or("mailharbor.invalid");
    format!("<{}@{}>", Uuid::new_v4().simple(), domain)
}

/// Wraps a message-id in angle brackets unless it already has them
fn bracketed(id: &str) -> String {
    let trimmed = id.trim();
    if trimmed.starts_with('<') && trimmed.ends_with('>') {
        trimmed.to_string()
    } else {
        format!("<{}>", trimmed)
    }
}

/// Assembles the MIME message
///
/// Text-only sends stay a single part; an HTML alternative produces
/// multipart/alternative; attachments wrap everything in multipart/mixed.
pub fn build_email(outgoing: &OutgoingMessage, message_id: &str) -> Result<Message, RelayError> {
    let mut builder = Message::builder()
        .from(outgoing.from.parse::<Mailbox>()?)
        .subject(outgoing.subject.clone())
        .message_id(Some(message_id.to_string()));

    for to in &outgoing.to {
        builder = builder.to(to.parse::<Mailbox>()?);
    }
    for cc in &outgoing.cc {
        builder = builder.cc(cc.parse::<Mailbox>()?);
    }
    for bcc in &outgoing.bcc {
        builder = builder.bcc(bcc.parse::<Mailbox>()?);
    }

    if let Some(parent) = &outgoing.in_reply_to {
        builder = builder.in_reply_to(bracketed(parent));
    }
    if !outgoing.references.is_empty() {
        let chain = outgoing
            .references
            .iter()
            .map(|id| bracketed(id))
            .collect::<Vec<_>>()
            .join(" ");
        builder = builder.references(chain);
    }

    let email = if outgoing.attachments.is_empty() {
        match &outgoing.html_body {
            Some(html) => builder.multipart(MultiPart::alternative_plain_html(
                outgoing.text_body.clone(),
                html.clone(),
            ))?,
            None => builder.body(outgoing.text_body.clone())?,
        }
    } else {
        let mut mixed = match &outgoing.html_body {
            Some(html) => MultiPart::mixed().multipart(MultiPart::alternative_plain_html(
                outgoing.text_body.clone(),
                html.clone(),
            )),
            None => MultiPart::mixed().singlepart(SinglePart::plain(outgoing.text_body.clone())),
        };
        for attachment in &outgoing.attachments {
            let content_type = ContentType::parse(&attachment.content_type)
                .map_err(|_| RelayError::InvalidContentType(attachment.content_type.clone()))?;
            mixed = mixed.singlepart(
                Attachment::new(attachment.filename.clone())
                    .body(attachment.data.clone(), content_type),
            );
        }
        builder.multipart(mixed)?
    };

    Ok(email)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_outgoing() -> OutgoingMessage {
        OutgoingMessage {
            from: "Alice <alice@example.com>".to_string(),
            to: vec!["bob@example.com".to_string()],
            cc: vec![],
            bcc: vec![],
            subject: "Hello".to_string(),
            text_body: "Hi Bob".to_string(),
            html_body: None,
            attachments: vec![],
            in_reply_to: None,
            references: vec![],
        }
    }

    #[test]
    fn test_generate_message_id_uses_sender_domain() {
        let id = generate_message_id("Alice <alice@example.com>");
        assert!(id.starts_with('<'));
        assert!(id.ends_with("@example.com>"));

        let fallback = generate_message_id("not-an-address");
        assert!(fallback.ends_with("@mailharbor.invalid>"));
    }

    #[test]
    fn test_bracketed_is_idempotent() {
        assert_eq!(bracketed("abc@x"), "<abc@x>");
        assert_eq!(bracketed("<abc@x>"), "<abc@x>");
        assert_eq!(bracketed("  abc@x "), "<abc@x>");
    }

    #[test]
    fn test_build_plain_email() {
        let email = build_email(&sample_outgoing(), "<id-1@example.com>").unwrap();
        let formatted = String::from_utf8(email.formatted()).unwrap();

        assert!(formatted.contains("From: Alice <alice@example.com>"));
        assert!(formatted.contains("To: bob@example.com"));
        assert!(formatted.contains("Subject: Hello"));
        assert!(formatted.contains("Message-ID: <id-1@example.com>"));
        assert!(formatted.contains("Hi Bob"));
    }

    #[test]
    fn test_build_email_with_threading_headers() {
        let mut outgoing = sample_outgoing();
        outgoing.in_reply_to = Some("parent@example.com".to_string());
        outgoing.references = vec!["root@example.com".to_string(), "<parent@example.com>".to_string()];

        let email = build_email(&outgoing, "<id-2@example.com>").unwrap();
        let formatted = String::from_utf8(email.formatted()).unwrap();

        assert!(formatted.contains("In-Reply-To: <parent@example.com>"));
        assert!(formatted.contains("References: <root@example.com> <parent@example.com>"));
    }

    #[test]
    fn test_build_email_with_html_and_attachment() {
        let mut outgoing = sample_outgoing();
        outgoing.html_body = Some("<p>Hi Bob</p>".to_string());
        outgoing.attachments = vec![OutgoingAttachment {
            filename: "notes.txt".to_string(),
            content_type: "text/plain".to_string(),
            data: b"attached".to_vec(),
        }];

        let email = build_email(&outgoing, "<id-3@example.com>").unwrap();
        let formatted = String::from_utf8(email.formatted()).unwrap();

        assert!(formatted.contains("multipart/mixed"));
        assert!(formatted.contains("multipart/alternative"));
        assert!(formatted.contains("filename=\"notes.txt\""));
    }

    #[test]
    fn test_build_email_rejects_bad_address() {
        let mut outgoing = sample_outgoing();
        outgoing.to = vec!["definitely not an address".to_string()];

        let err = build_email(&outgoing, "<id-4@example.com>").unwrap_err();
        assert!(matches!(err, RelayError::Address(_)));
    }

    #[test]
    fn test_build_email_rejects_bad_content_type() {
        let mut outgoing = sample_outgoing();
        outgoing.attachments = vec![OutgoingAttachment {
            filename: "x".to_string(),
            content_type: "not a mime type".to_string(),
            data: vec![],
        }];

        let err = build_email(&outgoing, "<id-5@example.com>").unwrap_err();
        assert!(matches!(err, RelayError::InvalidContentType(_)));
    }
}
