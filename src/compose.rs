//! Outbound message construction.
//!
//! Replies built here carry the `In-Reply-To` and `References` headers
//! that chain reconstruction reads on the receiving side: the original's
//! id becomes `In-Reply-To` and is appended to its `References` list, so a
//! monitored counterpart threads the reply without any extra state.
//! Rendering to RFC 5322 goes through `lettre`'s message builder.

use lettre::message::{Mailbox, Message, header};

use crate::error::{Error, Result};
use crate::message::EmailMessage;

// ── ComposedEmail ───────────────────────────────────────────────────────

/// An outbound email, assembled but not yet rendered or submitted.
#[derive(Debug, Clone)]
pub struct ComposedEmail {
    /// Recipient addresses.
    pub to: Vec<String>,
    /// CC addresses.
    pub cc: Vec<String>,
    /// Subject line.
    pub subject: String,
    /// Plain text body.
    pub body_text: String,
    /// Direct parent for threading, if this is a reply.
    pub in_reply_to: Option<String>,
    /// Ancestor chain for threading, oldest first.
    pub references: Vec<String>,
}

// ── compose_reply ───────────────────────────────────────────────────────

/// Build a reply to a received message, addressed back to its sender.
///
/// `body` goes above a quoted copy of the original; threading headers are
/// seeded from the original so the reply lands in the same chain.
pub fn compose_reply(original: &EmailMessage, body: &str) -> ComposedEmail {
    let mut references = original.references.clone();
    if !references.contains(&original.message_id) {
        references.push(original.message_id.clone());
    }

    ComposedEmail {
        to: vec![original.from.clone()],
        cc: Vec::new(),
        subject: reply_subject(&original.subject),
        body_text: format!("{body}\n\n{}", quote_original(original)),
        in_reply_to: Some(original.message_id.clone()),
        references,
    }
}

// ── compose_new ─────────────────────────────────────────────────────────

/// Build a fresh email with no threading ancestry.
pub fn compose_new(to: Vec<String>, subject: &str, body: &str) -> ComposedEmail {
    ComposedEmail {
        to,
        cc: Vec::new(),
        subject: subject.to_string(),
        body_text: body.to_string(),
        in_reply_to: None,
        references: Vec::new(),
    }
}

// ── to_mime ─────────────────────────────────────────────────────────────

/// Render a [`ComposedEmail`] as an RFC 5322 string.
pub fn to_mime(email: &ComposedEmail, from: &str) -> Result<String> {
    let message = build_mime(email, from, None)?;
    String::from_utf8(message.formatted()).map_err(|e| Error::Send {
        message: format!("MIME output is not valid UTF-8: {e}"),
    })
}

/// Build a `lettre::Message` for SMTP submission.
///
/// `message_id` of `None` lets `lettre` generate one; the sender passes an
/// explicit identifier so it can report what the message was sent under.
pub(crate) fn build_mime(
    email: &ComposedEmail,
    from: &str,
    message_id: Option<String>,
) -> Result<Message> {
    let mut builder = Message::builder()
        .from(parse_mailbox(from, "From")?)
        .subject(&email.subject)
        .message_id(message_id)
        .header(header::ContentType::TEXT_PLAIN);

    for addr in &email.to {
        builder = builder.to(parse_mailbox(addr, "To")?);
    }
    for addr in &email.cc {
        builder = builder.cc(parse_mailbox(addr, "Cc")?);
    }

    if let Some(ref parent) = email.in_reply_to {
        builder = builder.in_reply_to(parent.clone());
    }
    if !email.references.is_empty() {
        builder = builder.references(email.references.join(" "));
    }

    builder
        .body(email.body_text.clone())
        .map_err(|e| Error::Send {
            message: format!("failed to build MIME message: {e}"),
        })
}

// ── Helpers ─────────────────────────────────────────────────────────────

fn parse_mailbox(addr: &str, field: &str) -> Result<Mailbox> {
    addr.parse().map_err(|e| Error::Send {
        message: format!("invalid {field} address \"{addr}\": {e}"),
    })
}

/// Prefix the subject with `Re:` unless some variant of it is already
/// there.
fn reply_subject(subject: &str) -> String {
    if subject.to_lowercase().starts_with("re:") {
        subject.to_string()
    } else {
        format!("Re: {subject}")
    }
}

/// The original message as a `>`-quoted block under an attribution line.
fn quote_original(original: &EmailMessage) -> String {
    let when = match original.date {
        Some(ts) => ts.to_string(),
        None => "[unknown date]".to_string(),
    };

    let mut quoted = format!("On {when}, {} wrote:", original.from);
    if original.text.is_empty() {
        quoted.push_str("\n> [no text]");
    } else {
        for line in original.text.lines() {
            quoted.push_str("\n> ");
            quoted.push_str(line);
        }
    }
    quoted
}

// ── Tests ───────────────────────────────────────────────────────────────
