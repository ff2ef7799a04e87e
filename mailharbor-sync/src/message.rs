/// MIME extraction
///
/// Turns a raw RFC 822 body into the fields the metadata row carries:
/// message-id, addresses, date, a plain-text snippet, and attachment
/// summaries. The IMAP ENVELOPE is authoritative when present; everything
/// here is the fallback path for servers that return sparse or undecodable
/// envelopes, plus the parts ENVELOPE cannot provide at all (snippet,
/// attachments).

use chrono::{DateTime, Utc};
use mail_parser::{Addr, Address, MessageParser, MimeHeaders};

/// Maximum snippet length in characters
pub const SNIPPET_MAX_LEN: usize = 160;

/// One attachment's summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentSummary {
    pub filename: String,
    pub content_type: String,
    pub size_bytes: u64,
}

/// Fields extracted from a raw message body
#[derive(Debug, Clone, Default)]
pub struct ParsedMessage {
    pub message_id: Option<String>,
    pub subject: Option<String>,
    pub sender: Option<String>,
    pub recipients: Vec<String>,
    pub date: Option<DateTime<Utc>>,
    pub snippet: String,
    pub attachments: Vec<AttachmentSummary>,
}

impl ParsedMessage {
    pub fn has_attachments(&self) -> bool {
        !self.attachments.is_empty()
    }
}

/// Parses a raw message; returns None when the bytes are not parseable MIME
pub fn parse_message(raw: &[u8]) -> Option<ParsedMessage> {
    let parser = MessageParser::default();
    let message = parser.parse(raw)?;

    let message_id = message.message_id().map(|s| s.to_string());
    let subject = message.subject().map(|s| s.to_string());
    let sender = first_address(message.from());

    let mut recipients = collect_addresses(message.to());
    recipients.extend(collect_addresses(message.cc()));

    let date = message.date().and_then(|dt| {
        DateTime::parse_from_rfc3339(&dt.to_rfc3339())
            .ok()
            .map(|d| d.with_timezone(&Utc))
    });

    let snippet = message
        .body_text(0)
        .map(|text| make_snippet(&text))
        .unwrap_or_default();

    let attachments = message
        .attachments()
        .filter_map(|part| {
            let content_type = part
                .content_type()
                .map(|ct| match ct.subtype() {
                    Some(subtype) => format!("{}/{}", ct.c_type, subtype),
                    None => ct.c_type.to_string(),
                })
                .unwrap_or_else(|| "application/octet-stream".to_string());

            // Parts without a filename are body structure, not attachments
            // the UI should list.
            let filename = part.attachment_name()?.to_string();

            Some(AttachmentSummary {
                filename,
                content_type,
                size_bytes: part.contents().len() as u64,
            })
        })
        .collect();

    Some(ParsedMessage {
        message_id,
        subject,
        sender,
        recipients,
        date,
        snippet,
        attachments,
    })
}

/// Decodes a single raw header value (possibly RFC 2047 encoded-word)
///
/// Synthesizes a one-header message and lets mail-parser decode it, which
/// handles every encoding variant without a second decoding path.
pub fn decode_header_bytes(raw: &[u8]) -> String {
    let mut composed = b"Subject: ".to_vec();
    composed.extend_from_slice(raw);
    composed.extend_from_slice(b"\r\n\r\n");

    let parser = MessageParser::default();
    if let Some(msg) = parser.parse(&composed) {
        if let Some(subject) = msg.subject() {
            return subject.to_string();
        }
    }
    String::from_utf8_lossy(raw).trim().to_string()
}

/// Builds a list-view snippet: whitespace collapsed, truncated on a char
/// boundary
pub fn make_snippet(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(SNIPPET_MAX_LEN).collect()
}

fn first_address(value: Option<&Address>) -> Option<String> {
    value.and_then(Address::first).and_then(format_addr)
}

fn collect_addresses(value: Option<&Address>) -> Vec<String> {
    match value {
        Some(address) => address
            .iter()
            .filter_map(|a| a.address.as_deref().map(|s| s.to_string()))
            .collect(),
        None => Vec::new(),
    }
}

fn format_addr(addr: &Addr) -> Option<String> {
    let address = addr.address.as_deref()?;
    match addr.name.as_deref() {
        Some(name) if !name.is_empty() => Some(format!("{} <{}>", name, address)),
        _ => Some(address.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE: &[u8] = b"Message-ID: <msg-1@example.com>\r\n\
From: Alice Example <alice@example.com>\r\n\
To: bob@example.com, carol@example.com\r\n\
Subject: Quarterly report\r\n\
Date: Mon, 6 Jan 2025 10:30:00 +0000\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Hi Bob,\r\n\r\nthe   numbers are in.\r\n";

    #[test]
    fn test_parse_simple_message() {
        let parsed = parse_message(SIMPLE).unwrap();

        assert_eq!(parsed.message_id.as_deref(), Some("msg-1@example.com"));
        assert_eq!(parsed.subject.as_deref(), Some("Quarterly report"));
        assert_eq!(
            parsed.sender.as_deref(),
            Some("Alice Example <alice@example.com>")
        );
        assert_eq!(
            parsed.recipients,
            vec!["bob@example.com".to_string(), "carol@example.com".to_string()]
        );
        assert!(parsed.date.is_some());
        assert_eq!(parsed.snippet, "Hi Bob, the numbers are in.");
        assert!(!parsed.has_attachments());
    }

    #[test]
    fn test_parse_multipart_alternative_prefers_text() {
        let raw = b"From: a@example.com\r\n\
To: b@example.com\r\n\
Subject: Alt\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/alternative; boundary=\"xyz\"\r\n\
\r\n\
--xyz\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
plain body\r\n\
--xyz\r\n\
Content-Type: text/html; charset=utf-8\r\n\
\r\n\
<p>html body</p>\r\n\
--xyz--\r\n";

        let parsed = parse_message(raw).unwrap();
        assert_eq!(parsed.snippet, "plain body");
        assert!(!parsed.has_attachments());
    }

    #[test]
    fn test_parse_attachment() {
        let raw = b"From: a@example.com\r\n\
To: b@example.com\r\n\
Subject: With attachment\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"mix\"\r\n\
\r\n\
--mix\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
see attached\r\n\
--mix\r\n\
Content-Type: application/pdf\r\n\
Content-Disposition: attachment; filename=\"report.pdf\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
JVBERi0xLjQK\r\n\
--mix--\r\n";

        let parsed = parse_message(raw).unwrap();
        assert!(parsed.has_attachments());
        assert_eq!(parsed.attachments.len(), 1);
        assert_eq!(parsed.attachments[0].filename, "report.pdf");
        assert_eq!(parsed.attachments[0].content_type, "application/pdf");
        assert!(parsed.attachments[0].size_bytes > 0);
    }

    #[test]
    fn test_decode_header_encoded_word() {
        // "Grüße" in RFC 2047 base64
        let decoded = decode_header_bytes(b"=?UTF-8?B?R3LDvMOfZQ==?=");
        assert_eq!(decoded, "Grüße");

        let plain = decode_header_bytes(b"just ascii");
        assert_eq!(plain, "just ascii");
    }

    #[test]
    fn test_make_snippet_truncates_on_char_boundary() {
        let long = "ä".repeat(400);
        let snippet = make_snippet(&long);
        assert_eq!(snippet.chars().count(), SNIPPET_MAX_LEN);

        assert_eq!(make_snippet("  a \n b\t c  "), "a b c");
    }

    #[test]
    fn test_parse_garbage_is_none_or_empty() {
        // mail-parser is lenient; whatever comes back must not panic and
        // must not invent attachments.
        if let Some(parsed) = parse_message(b"\x00\x01\x02") {
            assert!(parsed.attachments.is_empty());
        }
    }
}
