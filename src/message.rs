//! The message entity: one observed email with its threading headers.

/// Subject used for placeholder entries standing in for referenced but
/// never-observed messages (see [`crate::chain::GapPolicy::Placeholder`]).
pub const MISSING_SUBJECT: &str = "[missing]";

/// One observed email message, immutable once constructed.
///
/// This is the value that flows from the account watchers through the
/// dispatcher into the index, and out to the consumer callback. Threading
/// metadata (`in_reply_to`, `references`) is normalized at parse time:
/// absent headers are `None`/empty, never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    /// RFC 5322 Message-ID; the primary key within a monitoring session.
    pub message_id: String,
    /// Sender address.
    pub from: String,
    /// Recipient addresses.
    pub to: Vec<String>,
    /// CC addresses.
    pub cc: Vec<String>,
    /// BCC addresses (rarely present on received mail).
    pub bcc: Vec<String>,
    /// Subject line (empty if absent).
    pub subject: String,
    /// Plain text body (empty if absent).
    pub text: String,
    /// HTML body, if the message carried one.
    pub html: Option<String>,
    /// Send date as unix seconds. The authoritative sort key for chains.
    pub date: Option<u64>,
    /// Message-ID of the direct parent, if this is a reply.
    pub in_reply_to: Option<String>,
    /// Ancestor Message-IDs, oldest first. Candidates only — entries are
    /// not guaranteed to exist in the index, and the last entry should
    /// (but need not) match `in_reply_to`.
    pub references: Vec<String>,
}

impl EmailMessage {
    /// Whether this message is a reply to another message.
    pub fn is_reply(&self) -> bool {
        self.in_reply_to.is_some()
    }

    /// All recipient addresses (to + cc + bcc).
    pub fn all_recipients(&self) -> Vec<&str> {
        self.to
            .iter()
            .chain(self.cc.iter())
            .chain(self.bcc.iter())
            .map(String::as_str)
            .collect()
    }

    /// All participant addresses: sender plus every recipient.
    pub fn participants(&self) -> Vec<&str> {
        let mut all = vec![self.from.as_str()];
        all.extend(self.all_recipients());
        all
    }

    /// A placeholder entry for a referenced message that was never
    /// observed. Carries only the Message-ID and the `"[missing]"` marker.
    pub fn missing(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            from: String::new(),
            to: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
            subject: MISSING_SUBJECT.to_string(),
            text: String::new(),
            html: None,
            date: None,
            in_reply_to: None,
            references: Vec::new(),
        }
    }

    /// Whether this entry is a gap placeholder produced by
    /// [`EmailMessage::missing`] rather than an observed message.
    pub fn is_missing(&self) -> bool {
        self.subject == MISSING_SUBJECT && self.from.is_empty() && self.text.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: &str, date: u64) -> EmailMessage {
        EmailMessage {
            message_id: id.to_string(),
            from: "alice@example.com".to_string(),
            to: vec!["bob@example.com".to_string()],
            cc: Vec::new(),
            bcc: Vec::new(),
            subject: "Hello".to_string(),
            text: "body".to_string(),
            html: None,
            date: Some(date),
            in_reply_to: None,
            references: Vec::new(),
        }
    }

    #[test]
    fn is_reply_follows_in_reply_to() {
        let mut msg = sample("<a@ex>", 100);
        assert!(!msg.is_reply());
        msg.in_reply_to = Some("<parent@ex>".to_string());
        assert!(msg.is_reply());
    }

    #[test]
    fn all_recipients_combines_to_cc_bcc() {
        let mut msg = sample("<a@ex>", 100);
        msg.cc = vec!["carol@example.com".to_string()];
        msg.bcc = vec!["dave@example.com".to_string()];
        let recipients = msg.all_recipients();
        assert_eq!(
            recipients,
            vec!["bob@example.com", "carol@example.com", "dave@example.com"]
        );
    }

    #[test]
    fn participants_includes_sender() {
        let msg = sample("<a@ex>", 100);
        let participants = msg.participants();
        assert!(participants.contains(&"alice@example.com"));
        assert!(participants.contains(&"bob@example.com"));
    }

    #[test]
    fn missing_placeholder_roundtrip() {
        let ph = EmailMessage::missing("<gone@ex>");
        assert_eq!(ph.message_id, "<gone@ex>");
        assert_eq!(ph.subject, MISSING_SUBJECT);
        assert!(ph.is_missing());
        assert!(ph.date.is_none());
    }

    #[test]
    fn real_message_is_not_missing() {
        assert!(!sample("<a@ex>", 100).is_missing());
    }
}
