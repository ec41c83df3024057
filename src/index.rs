//! Thread-safe in-memory message index keyed by Message-ID.
//!
//! The single source of truth for chain reconstruction. Populated by the
//! dispatcher, read concurrently by the chain builder and external
//! accessors. Entries are never removed except by [`MessageIndex::clear`].

use dashmap::DashMap;

use crate::message::EmailMessage;

/// Concurrent map from Message-ID to [`EmailMessage`].
///
/// Insertion is idempotent: re-inserting an already-present identifier is a
/// no-op, which is how the dispatcher detects duplicate delivery from the
/// protocol layer ("new mail" notifications are not exactly-once).
#[derive(Debug, Default)]
pub struct MessageIndex {
    messages: DashMap<String, EmailMessage>,
}

impl MessageIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a message, keyed by its Message-ID.
    ///
    /// Returns `true` if the identifier was newly added, `false` if an
    /// entry with the same identifier already existed (the existing entry
    /// is kept unchanged).
    pub fn insert(&self, message: EmailMessage) -> bool {
        match self.messages.entry(message.message_id.clone()) {
            dashmap::Entry::Occupied(_) => false,
            dashmap::Entry::Vacant(entry) => {
                entry.insert(message);
                true
            }
        }
    }

    /// Look up a message by Message-ID.
    pub fn get(&self, message_id: &str) -> Option<EmailMessage> {
        self.messages.get(message_id).map(|entry| entry.clone())
    }

    /// Whether a message with this Message-ID is stored.
    pub fn contains(&self, message_id: &str) -> bool {
        self.messages.contains_key(message_id)
    }

    /// Number of stored messages (distinct identifiers).
    pub fn count(&self) -> usize {
        self.messages.len()
    }

    /// Whether the index holds no messages.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// All stored Message-IDs, in no particular order.
    pub fn message_ids(&self) -> Vec<String> {
        self.messages.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Remove all messages.
    pub fn clear(&self) {
        let removed = self.messages.len();
        self.messages.clear();
        tracing::info!(removed, "message index cleared");
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
    fn insert_and_get() {
        let index = MessageIndex::new();
        assert!(index.insert(sample("<a@ex>", 100)));
        let stored = index.get("<a@ex>").unwrap();
        assert_eq!(stored.message_id, "<a@ex>");
        assert_eq!(index.count(), 1);
    }

    #[test]
    fn duplicate_insert_is_noop() {
        let index = MessageIndex::new();
        assert!(index.insert(sample("<a@ex>", 100)));

        // Second insert with the same id (even with different content)
        // does not replace the stored entry.
        let mut altered = sample("<a@ex>", 100);
        altered.subject = "changed".to_string();
        assert!(!index.insert(altered));

        assert_eq!(index.count(), 1);
        assert_eq!(index.get("<a@ex>").unwrap().subject, "Hello");
    }

    #[test]
    fn count_tracks_distinct_ids() {
        let index = MessageIndex::new();
        for _ in 0..3 {
            index.insert(sample("<a@ex>", 100));
            index.insert(sample("<b@ex>", 200));
        }
        assert_eq!(index.count(), 2);
    }

    #[test]
    fn contains_and_missing() {
        let index = MessageIndex::new();
        index.insert(sample("<a@ex>", 100));
        assert!(index.contains("<a@ex>"));
        assert!(!index.contains("<b@ex>"));
        assert!(index.get("<b@ex>").is_none());
    }

    #[test]
    fn clear_empties_index() {
        let index = MessageIndex::new();
        index.insert(sample("<a@ex>", 100));
        index.insert(sample("<b@ex>", 200));
        index.clear();
        assert!(index.is_empty());
        assert_eq!(index.count(), 0);
    }

    #[test]
    fn message_ids_lists_all() {
        let index = MessageIndex::new();
        index.insert(sample("<a@ex>", 100));
        index.insert(sample("<b@ex>", 200));
        let mut ids = index.message_ids();
        ids.sort();
        assert_eq!(ids, vec!["<a@ex>", "<b@ex>"]);
    }

    #[test]
    fn concurrent_inserts_stay_consistent() {
        use std::sync::Arc;

        let index = Arc::new(MessageIndex::new());
        let mut handles = Vec::new();
        for t in 0..4 {
            let index = Arc::clone(&index);
            handles.push(std::thread::spawn(move || {
                for i in 0..50 {
                    // Half the ids collide across threads.
                    let id = format!("<{}@ex>", i + (t % 2) * 50);
                    index.insert(sample(&id, i as u64));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(index.count(), 100);
    }
}
