//! MIME normalization via `mail-parser`.
//!
//! Converts raw RFC 5322 bytes into an [`EmailMessage`]. This is the single
//! place where header representation variance (single value vs. list,
//! absent vs. empty) is flattened, so downstream components never branch on
//! it. Missing or malformed headers degrade to defaults; only a message
//! that cannot be parsed at all is an error.

use mail_parser::MessageParser;

use crate::error::{Error, Result};
use crate::message::EmailMessage;
use crate::source::RawMail;

/// Parse a [`RawMail`] into an [`EmailMessage`].
///
/// Best-effort defaults: a missing Message-ID is replaced with a generated
/// `<generated-{uid}>` identifier, a missing subject or body becomes empty,
/// and absent threading headers simply mean "no known parent".
pub fn to_message(raw: &RawMail) -> Result<EmailMessage> {
    let message = MessageParser::default()
        .parse(&raw.data)
        .ok_or_else(|| Error::Parse {
            message: format!(
                "failed to parse MIME message (uid: {}, {} bytes)",
                raw.uid,
                raw.data.len()
            ),
        })?;

    let message_id = message
        .message_id()
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("<generated-{}>", raw.uid));

    let from = message
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .unwrap_or("")
        .to_string();

    let to = message.to().map(extract_addresses).unwrap_or_default();
    let cc = message.cc().map(extract_addresses).unwrap_or_default();
    let bcc = message.bcc().map(extract_addresses).unwrap_or_default();

    let subject = message.subject().unwrap_or("").to_string();

    let date = message
        .date()
        .map(|dt| dt.to_timestamp())
        .filter(|ts| *ts >= 0)
        .map(|ts| ts as u64);

    let in_reply_to = extract_first_text(message.in_reply_to());
    let references = extract_text_list(message.references());

    let text = message
        .body_text(0)
        .map(|s| s.to_string())
        .unwrap_or_default();
    // body_html synthesizes markup from the text part when no HTML part
    // exists; only keep it when the message actually carried one.
    let html = message
        .html_part(0)
        .is_some_and(|part| part.is_text_html())
        .then(|| message.body_html(0).map(|s| s.to_string()))
        .flatten();

    Ok(EmailMessage {
        message_id,
        from,
        to,
        cc,
        bcc,
        subject,
        text,
        html,
        date,
        in_reply_to,
        references,
    })
}

// ── Helpers ─────────────────────────────────────────────────────────────

/// Extract email addresses from an `Address` value (To, Cc, Bcc).
fn extract_addresses(addr: &mail_parser::Address<'_>) -> Vec<String> {
    addr.iter()
        .filter_map(|a| a.address().map(|s| s.to_string()))
        .collect()
}

/// Extract the first text value from a HeaderValue (for In-Reply-To).
fn extract_first_text(hv: &mail_parser::HeaderValue<'_>) -> Option<String> {
    match hv {
        mail_parser::HeaderValue::Text(s) => Some(s.to_string()),
        mail_parser::HeaderValue::TextList(list) => list.first().map(|s| s.to_string()),
        _ => None,
    }
}

/// Extract all text values from a HeaderValue (for References).
fn extract_text_list(hv: &mail_parser::HeaderValue<'_>) -> Vec<String> {
    match hv {
        mail_parser::HeaderValue::Text(s) => vec![s.to_string()],
        mail_parser::HeaderValue::TextList(list) => {
            list.iter().map(|s| s.to_string()).collect()
        }
        _ => Vec::new(),
    }
}

// ── Tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_from_str(uid: &str, text: &str) -> RawMail {
        RawMail {
            uid: uid.to_string(),
            mailbox: "INBOX".to_string(),
            data: text.as_bytes().to_vec(),
        }
    }

    const SIMPLE_EMAIL: &str = "\
From: Alice <alice@example.com>\r\n\
To: Bob <bob@example.com>\r\n\
Subject: Hello Bob\r\n\
Message-ID: <msg-001@example.com>\r\n\
Date: Sat, 20 Nov 2021 14:22:01 -0800\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Hi Bob, this is a test email.\r\n";

    #[test]
    fn parse_simple_text_email() {
        let raw = raw_from_str("1", SIMPLE_EMAIL);
        let parsed = to_message(&raw).unwrap();

        assert_eq!(parsed.message_id, "msg-001@example.com");
        assert_eq!(parsed.from, "alice@example.com");
        assert_eq!(parsed.to, vec!["bob@example.com"]);
        assert!(parsed.cc.is_empty());
        assert!(parsed.bcc.is_empty());
        assert_eq!(parsed.subject, "Hello Bob");
        assert!(parsed.date.is_some());
        assert!(parsed.in_reply_to.is_none());
        assert!(parsed.references.is_empty());
        assert!(parsed.text.contains("test email"));
        assert!(!parsed.is_reply());
    }

    #[test]
    fn parse_reply_with_references() {
        let email = "\
From: Bob <bob@example.com>\r\n\
To: Alice <alice@example.com>\r\n\
Subject: Re: Hello Bob\r\n\
Message-ID: <msg-002@example.com>\r\n\
In-Reply-To: <msg-001@example.com>\r\n\
References: <msg-000@example.com> <msg-001@example.com>\r\n\
Date: Sun, 21 Nov 2021 10:00:00 -0800\r\n\
Content-Type: text/plain\r\n\
\r\n\
Hi Alice, thanks for writing!\r\n";

        let raw = raw_from_str("2", email);
        let parsed = to_message(&raw).unwrap();

        assert_eq!(parsed.in_reply_to, Some("msg-001@example.com".to_string()));
        assert_eq!(
            parsed.references,
            vec!["msg-000@example.com", "msg-001@example.com"]
        );
        assert!(parsed.is_reply());
    }

    #[test]
    fn parse_missing_message_id_generates_fallback() {
        let email = "\
From: sender@example.com\r\n\
To: recipient@example.com\r\n\
Subject: No message ID\r\n\
Content-Type: text/plain\r\n\
\r\n\
Body text\r\n";

        let raw = raw_from_str("99", email);
        let parsed = to_message(&raw).unwrap();
        assert_eq!(parsed.message_id, "<generated-99>");
    }

    #[test]
    fn parse_missing_subject_and_body_degrade_to_empty() {
        let email = "\
From: sender@example.com\r\n\
To: recipient@example.com\r\n\
Message-ID: <bare-001@example.com>\r\n\
Content-Type: text/plain\r\n\
\r\n";

        let raw = raw_from_str("5", email);
        let parsed = to_message(&raw).unwrap();
        assert_eq!(parsed.subject, "");
        assert!(parsed.text.is_empty());
        assert!(parsed.html.is_none());
    }

    #[test]
    fn parse_multipart_alternative_keeps_both_bodies() {
        let email = "\
From: sender@example.com\r\n\
To: recipient@example.com\r\n\
Subject: Multipart test\r\n\
Message-ID: <multi-001@example.com>\r\n\
Content-Type: multipart/alternative; boundary=\"boundary42\"\r\n\
\r\n\
--boundary42\r\n\
Content-Type: text/plain\r\n\
\r\n\
Plain text body\r\n\
--boundary42\r\n\
Content-Type: text/html\r\n\
\r\n\
<p>HTML body</p>\r\n\
--boundary42--\r\n";

        let raw = raw_from_str("3", email);
        let parsed = to_message(&raw).unwrap();
        assert!(parsed.text.contains("Plain text body"));
        assert!(parsed.html.unwrap().contains("HTML body"));
    }

    #[test]
    fn plain_text_only_message_has_no_html() {
        let email = "\
From: sender@example.com\r\n\
To: recipient@example.com\r\n\
Subject: Plain only\r\n\
Message-ID: <plain-001@example.com>\r\n\
Content-Type: text/plain\r\n\
\r\n\
Just text, no markup.\r\n";

        let raw = raw_from_str("6", email);
        let parsed = to_message(&raw).unwrap();
        assert!(parsed.text.contains("Just text"));
        assert!(parsed.html.is_none());
    }

    #[test]
    fn parse_cc_addresses() {
        let email = "\
From: sender@example.com\r\n\
To: alice@example.com\r\n\
Cc: bob@example.com, carol@example.com\r\n\
Subject: CC test\r\n\
Message-ID: <cc-001@example.com>\r\n\
Content-Type: text/plain\r\n\
\r\n\
Body\r\n";

        let raw = raw_from_str("4", email);
        let parsed = to_message(&raw).unwrap();
        assert_eq!(parsed.cc.len(), 2);
        assert!(parsed.cc.contains(&"bob@example.com".to_string()));
        assert!(parsed.cc.contains(&"carol@example.com".to_string()));
    }

    #[test]
    fn unparseable_bytes_are_an_error() {
        let raw = RawMail {
            uid: "7".to_string(),
            mailbox: "INBOX".to_string(),
            data: Vec::new(),
        };
        assert!(to_message(&raw).is_err());
    }
}
