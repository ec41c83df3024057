//! Fan-in dispatcher: serializes all watcher output into one callback stream.
//!
//! A single consumer drains the bounded channel fed by every account
//! watcher, so the consumer callback — which runs arbitrary user code — is
//! never invoked concurrently and sees a total order over relevant
//! messages. The dispatcher is also the only writer of the message index.

use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

use crate::chain::ChainBuilder;
use crate::index::MessageIndex;
use crate::message::EmailMessage;
use crate::watcher::WatcherOutput;

/// How long one queue wait lasts before the stop signal is re-checked.
const RECV_SLICE: Duration = Duration::from_millis(100);

/// Consumer callback, invoked once per relevant message with the message
/// and its reconstructed chain (oldest to newest).
///
/// Invocations are strictly sequential; a blocking callback stalls the
/// entire dispatch stream.
pub type MessageCallback = Box<dyn FnMut(&EmailMessage, &[EmailMessage]) + Send>;

// ── DrainPolicy ─────────────────────────────────────────────────────────

/// What to do with already-queued messages when stop is signalled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrainPolicy {
    /// Process everything already in the queue, then exit.
    #[default]
    Drain,
    /// Drop the queue contents and exit immediately.
    Discard,
}

// ── Dispatcher ──────────────────────────────────────────────────────────

/// Single-consumer dispatch loop.
pub(crate) struct Dispatcher {
    rx: Receiver<WatcherOutput>,
    /// Watched addresses, lowercased.
    watched: HashSet<String>,
    index: Arc<MessageIndex>,
    builder: ChainBuilder,
    callback: MessageCallback,
    stop: Arc<AtomicBool>,
    drain_policy: DrainPolicy,
}

impl Dispatcher {
    pub fn new(
        rx: Receiver<WatcherOutput>,
        watched: impl IntoIterator<Item = String>,
        index: Arc<MessageIndex>,
        builder: ChainBuilder,
        callback: MessageCallback,
        stop: Arc<AtomicBool>,
        drain_policy: DrainPolicy,
    ) -> Self {
        Self {
            rx,
            watched: watched
                .into_iter()
                .map(|addr| addr.to_ascii_lowercase())
                .collect(),
            index,
            builder,
            callback,
            stop,
            drain_policy,
        }
    }

    /// Consume the queue until stop is signalled (honoring the drain
    /// policy) or every producer has hung up.
    pub fn run(mut self) {
        tracing::debug!(watched = self.watched.len(), "dispatcher running");
        loop {
            if self.stop.load(Ordering::SeqCst) {
                match self.drain_policy {
                    DrainPolicy::Drain => {
                        let mut drained = 0usize;
                        while let Ok(out) = self.rx.try_recv() {
                            self.process(out);
                            drained += 1;
                        }
                        if drained > 0 {
                            tracing::debug!(drained, "queued messages drained on stop");
                        }
                    }
                    DrainPolicy::Discard => {
                        let discarded = self.rx.try_iter().count();
                        if discarded > 0 {
                            tracing::debug!(discarded, "queued messages discarded on stop");
                        }
                    }
                }
                break;
            }

            match self.rx.recv_timeout(RECV_SLICE) {
                Ok(out) => self.process(out),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        tracing::debug!("dispatcher exiting");
    }

    /// Handle one watcher emission: filter, store, build, call back.
    fn process(&mut self, out: WatcherOutput) {
        let message = out.message;

        if !self.is_relevant(&message) {
            tracing::debug!(
                account = %out.account,
                message_id = %message.message_id,
                "message not relevant, discarded"
            );
            return;
        }

        // Idempotent insert doubles as the duplicate-delivery guard: a
        // known identifier means this message was already dispatched (or
        // pre-loaded), so no second callback.
        if !self.index.insert(message.clone()) {
            tracing::debug!(
                message_id = %message.message_id,
                "duplicate delivery, skipping"
            );
            return;
        }

        if out.silent {
            tracing::debug!(
                message_id = %message.message_id,
                "pre-loaded without callback"
            );
            return;
        }

        let chain = self.builder.build_chain(&message);
        tracing::info!(
            account = %out.account,
            message_id = %message.message_id,
            chain_len = chain.len(),
            "dispatching message to consumer"
        );

        let callback = &mut self.callback;
        if catch_unwind(AssertUnwindSafe(|| callback(&message, &chain))).is_err() {
            tracing::error!(
                message_id = %message.message_id,
                "consumer callback panicked; continuing with next message"
            );
        }
    }

    /// A message is relevant when at least two distinct watched addresses
    /// participate in it (sender + to + cc + bcc) — that is, it is traffic
    /// between watched accounts, not just mail one of them received.
    fn is_relevant(&self, message: &EmailMessage) -> bool {
        let mut watched_participants: HashSet<String> = HashSet::new();
        for addr in message.participants() {
            let lower = addr.to_ascii_lowercase();
            if self.watched.contains(&lower) {
                watched_participants.insert(lower);
            }
        }
        watched_participants.len() >= 2
    }
}

// ── Tests ───────────────────────────────────────────────────────────────
