//! Reply-chain reconstruction over the message index.
//!
//! Given one message, rebuilds its ordered conversation from `References`
//! and `In-Reply-To` header data. Chains are derived views, recomputed on
//! demand: the index may grow, so an earlier chain can become more complete
//! when a previously missing ancestor arrives.
//!
//! Header data is never trusted to be well-formed — traversal is iterative
//! with a visited set, so cycles and self-references terminate immediately.

use std::collections::HashSet;
use std::sync::Arc;

use crate::index::MessageIndex;
use crate::message::EmailMessage;

// ── GapPolicy ───────────────────────────────────────────────────────────

/// How to handle ancestor identifiers that are not present in the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GapPolicy {
    /// Silently omit missing ancestors; the chain contains only
    /// materialized messages (keeps chain length accurate).
    #[default]
    Skip,
    /// Emit an [`EmailMessage::missing`] placeholder for each missing
    /// ancestor, preserving its position in the chain.
    Placeholder,
}

// ── ChainBuilder ────────────────────────────────────────────────────────

/// Builder for ordered conversation chains.
///
/// Membership comes from `References` (preferred, already oldest-first) or
/// a recursive `In-Reply-To` walk; final presentation order comes from the
/// message timestamps, which win over header order when the two disagree
/// (clock skew, malformed headers).
#[derive(Debug, Clone)]
pub struct ChainBuilder {
    index: Arc<MessageIndex>,
    gap_policy: GapPolicy,
}

impl ChainBuilder {
    /// Create a builder with the default [`GapPolicy::Skip`].
    pub fn new(index: Arc<MessageIndex>) -> Self {
        Self {
            index,
            gap_policy: GapPolicy::default(),
        }
    }

    /// Create a builder with an explicit gap policy.
    pub fn with_gap_policy(index: Arc<MessageIndex>, gap_policy: GapPolicy) -> Self {
        Self { index, gap_policy }
    }

    /// The configured gap policy.
    pub fn gap_policy(&self) -> GapPolicy {
        self.gap_policy
    }

    /// Build the full conversation chain for `message`, oldest to newest.
    ///
    /// The message itself need not be stored in the index; it is always the
    /// final element unless a timestamp disagreement reorders it. A message
    /// with no `References` and no `In-Reply-To` yields a single-element
    /// chain.
    pub fn build_chain(&self, message: &EmailMessage) -> Vec<EmailMessage> {
        let candidates = if message.references.is_empty() {
            self.trace_in_reply_to(message)
        } else {
            message.references.clone()
        };

        let mut chain: Vec<EmailMessage> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        // Timestamp of the most recent resolved ancestor; placeholders
        // inherit it so the stable sort keeps them at their reference
        // position instead of pushing them to the front.
        let mut last_date: Option<u64> = None;

        for id in &candidates {
            if *id == message.message_id || !seen.insert(id.clone()) {
                continue;
            }
            match self.index.get(id) {
                Some(found) => {
                    last_date = found.date.or(last_date);
                    chain.push(found);
                }
                None => match self.gap_policy {
                    GapPolicy::Skip => {
                        tracing::debug!(message_id = %id, "ancestor not in index, skipping gap");
                    }
                    GapPolicy::Placeholder => {
                        let mut placeholder = EmailMessage::missing(id.clone());
                        placeholder.date = last_date;
                        chain.push(placeholder);
                    }
                },
            }
        }

        chain.push(message.clone());

        // Stable sort: ties (and inherited placeholder dates) keep their
        // membership order.
        chain.sort_by_key(|m| m.date.unwrap_or(0));

        tracing::debug!(
            message_id = %message.message_id,
            chain_len = chain.len(),
            "reply chain built"
        );
        chain
    }

    /// The first (oldest) message of the chain containing `message`.
    pub fn thread_root(&self, message: &EmailMessage) -> Option<EmailMessage> {
        self.build_chain(message).into_iter().next()
    }

    /// Number of messages in the chain containing `message`.
    pub fn thread_length(&self, message: &EmailMessage) -> usize {
        self.build_chain(message).len()
    }

    /// Collect ancestor identifiers by walking `In-Reply-To` pointers one
    /// hop at a time, returning them oldest first.
    ///
    /// Each hop looks the parent up in the index and continues from the
    /// parent's own `In-Reply-To`. An unresolved parent still contributes
    /// its identifier (it becomes a gap), but the walk cannot continue past
    /// it. A visited set guards against reference cycles: the cycle point
    /// is treated as the root.
    fn trace_in_reply_to(&self, message: &EmailMessage) -> Vec<String> {
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(message.message_id.clone());

        let mut newest_first: Vec<String> = Vec::new();
        let mut next = message.in_reply_to.clone();

        while let Some(id) = next {
            if !visited.insert(id.clone()) {
                tracing::warn!(
                    message_id = %id,
                    "reference cycle detected in reply chain, stopping traversal"
                );
                break;
            }
            next = self.index.get(&id).and_then(|parent| parent.in_reply_to.clone());
            newest_first.push(id);
        }

        newest_first.reverse();
        newest_first
    }
}

// ── Tests ───────────────────────────────────────────────────────────────
