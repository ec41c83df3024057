//! Monitor: the public entry point tying accounts, watchers, and the
//! dispatcher together.
//!
//! One [`Monitor`] owns a watcher thread per account, a bounded fan-in
//! queue, and a single dispatcher thread that runs the consumer callback.
//! Construction validates configuration; `start`/`start_async` spawn the
//! threads; `stop` signals shutdown and joins them.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::sync_channel;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use dashmap::DashMap;

use crate::account::EmailAccount;
use crate::chain::{ChainBuilder, GapPolicy};
use crate::dispatch::{Dispatcher, DrainPolicy, MessageCallback};
use crate::error::{Error, Result};
use crate::index::MessageIndex;
use crate::message::EmailMessage;
use crate::source::{ImapSource, MailSource};
use crate::watcher::{
    AccountWatcher, DEFAULT_IDLE_SLICE, DEFAULT_SESSION_LIFETIME, WatcherState, WatcherTuning,
};

/// Builds a [`MailSource`] for one account. Overridable for tests and
/// alternative endpoints.
pub type SourceFactory = Box<dyn Fn(&EmailAccount) -> Box<dyn MailSource> + Send + Sync>;

// ── MonitorConfig ───────────────────────────────────────────────────────

/// Tunables for a [`Monitor`]. The defaults suit interactive use against
/// ordinary IMAP servers.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// How chain reconstruction treats referenced-but-unknown messages.
    pub gap_policy: GapPolicy,
    /// What happens to queued messages when stop is signalled.
    pub drain_policy: DrainPolicy,
    /// Capacity of the watcher-to-dispatcher queue. A full queue blocks
    /// watchers rather than dropping mail.
    pub queue_depth: usize,
    /// Fetch with flags that mark messages read on the server. Off by
    /// default: watching should be invisible to other mail clients.
    pub auto_mark_seen: bool,
    /// First reconnect delay after a transient failure.
    pub backoff_min: Duration,
    /// Reconnect delay ceiling.
    pub backoff_max: Duration,
    /// Length of one idle wait against the server. Also bounds how long a
    /// stop signal can go unobserved by a parked watcher.
    pub idle_slice: Duration,
    /// Proactive session renewal bound; keep it under the server's own
    /// IDLE expiry (~30 minutes is common).
    pub session_lifetime: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            gap_policy: GapPolicy::default(),
            drain_policy: DrainPolicy::default(),
            queue_depth: 256,
            auto_mark_seen: false,
            backoff_min: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
            idle_slice: DEFAULT_IDLE_SLICE,
            session_lifetime: DEFAULT_SESSION_LIFETIME,
        }
    }
}

// ── StopHandle ──────────────────────────────────────────────────────────

/// Cloneable handle that signals a running [`Monitor`] to stop.
///
/// Obtain one with [`Monitor::stop_handle`] before starting; clones can be
/// moved into the consumer callback, a signal handler, or another thread —
/// anywhere the monitor itself cannot be borrowed while [`Monitor::start`]
/// blocks.
#[derive(Debug, Clone)]
pub struct StopHandle {
    stop: Arc<AtomicBool>,
}

impl StopHandle {
    /// Raise the stop signal. Watchers and the dispatcher observe it
    /// between wait slices; [`Monitor::start`] then returns after joining
    /// them.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Whether the stop signal has been raised.
    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

// ── Monitor ─────────────────────────────────────────────────────────────

/// Multi-account mail monitor with reply-chain reconstruction.
///
/// ```no_run
/// use email_threads::{EmailAccount, Monitor};
///
/// # fn main() -> email_threads::Result<()> {
/// let accounts = vec![
///     EmailAccount::new("alice@example.com", "secret", "imap.example.com"),
///     EmailAccount::new("bob@example.com", "secret", "imap.example.com"),
/// ];
/// let mut monitor = Monitor::new(accounts, |message, chain| {
///     println!("{}: chain of {}", message.subject, chain.len());
/// })?;
/// let stop = monitor.stop_handle(); // clone into a callback or ctrl-c hook
/// monitor.start()?; // blocks until `stop.stop()` is called
/// # Ok(())
/// # }
/// ```
pub struct Monitor {
    accounts: Vec<EmailAccount>,
    config: MonitorConfig,
    /// Taken by the dispatcher thread on start.
    callback: Option<MessageCallback>,
    source_factory: Option<SourceFactory>,
    index: Arc<MessageIndex>,
    stop: Arc<AtomicBool>,
    status: Arc<DashMap<String, WatcherState>>,
    handles: Vec<JoinHandle<()>>,
}

impl Monitor {
    /// Create a monitor over `accounts`, delivering every relevant message
    /// with its reconstructed chain to `callback`.
    ///
    /// Fails with [`Error::Config`] when no accounts are given or an
    /// account is incomplete.
    pub fn new(
        accounts: Vec<EmailAccount>,
        callback: impl FnMut(&EmailMessage, &[EmailMessage]) + Send + 'static,
    ) -> Result<Self> {
        if accounts.is_empty() {
            return Err(Error::Config {
                message: "at least one account is required".to_string(),
            });
        }
        for account in &accounts {
            account.validate()?;
        }

        Ok(Self {
            accounts,
            config: MonitorConfig::default(),
            callback: Some(Box::new(callback)),
            source_factory: None,
            index: Arc::new(MessageIndex::new()),
            stop: Arc::new(AtomicBool::new(false)),
            status: Arc::new(DashMap::new()),
            handles: Vec::new(),
        })
    }

    /// Replace the default configuration.
    pub fn with_config(mut self, config: MonitorConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace how per-account mail sources are built (tests, alternative
    /// protocols). The default builds an IMAP source per account.
    pub fn with_source_factory(mut self, factory: SourceFactory) -> Self {
        self.source_factory = Some(factory);
        self
    }

    /// Start watching and block the calling thread until a
    /// [`StopHandle`] raises the stop signal.
    pub fn start(&mut self) -> Result<()> {
        self.start_async()?;
        while !self.stop.load(Ordering::SeqCst) {
            thread::park_timeout(Duration::from_millis(200));
        }
        self.join_threads();
        Ok(())
    }

    /// Start watching in the background and return immediately.
    pub fn start_async(&mut self) -> Result<()> {
        let callback = self.callback.take().ok_or_else(|| Error::Config {
            message: "monitor already started".to_string(),
        })?;

        let (tx, rx) = sync_channel(self.config.queue_depth);

        let tuning = WatcherTuning {
            idle_slice: self.config.idle_slice,
            session_lifetime: self.config.session_lifetime,
            backoff_min: self.config.backoff_min,
            backoff_max: self.config.backoff_max,
        };
        for account in &self.accounts {
            let watcher = AccountWatcher::new(
                account.clone(),
                tx.clone(),
                Arc::clone(&self.stop),
                Arc::clone(&self.status),
                tuning.clone(),
            );
            let source = self.build_source(account);
            let handle = thread::Builder::new()
                .name(format!("watch-{}", account.email))
                .spawn(move || watcher.run(source))
                .map_err(|e| Error::Config {
                    message: format!("failed to spawn watcher thread: {e}"),
                })?;
            self.handles.push(handle);
        }
        // The dispatcher's receiver is the only other owner; dropping our
        // sender lets it observe watcher hang-up.
        drop(tx);

        let dispatcher = Dispatcher::new(
            rx,
            self.accounts.iter().map(|a| a.email.clone()),
            Arc::clone(&self.index),
            ChainBuilder::with_gap_policy(Arc::clone(&self.index), self.config.gap_policy),
            callback,
            Arc::clone(&self.stop),
            self.config.drain_policy,
        );
        let handle = thread::Builder::new()
            .name("mail-dispatch".to_string())
            .spawn(move || dispatcher.run())
            .map_err(|e| Error::Config {
                message: format!("failed to spawn dispatcher thread: {e}"),
            })?;
        self.handles.push(handle);

        tracing::info!(accounts = self.accounts.len(), "monitor started");
        Ok(())
    }

    /// A cloneable handle for signalling this monitor to stop, usable
    /// while [`Monitor::start`] holds the exclusive borrow.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            stop: Arc::clone(&self.stop),
        }
    }

    /// Signal shutdown and join all threads. Idempotent. Joining can take
    /// up to the configured `idle_slice` while a watcher finishes the wait
    /// it is parked in against a real server.
    pub fn stop(&mut self) {
        if !self.stop.swap(true, Ordering::SeqCst) {
            tracing::info!("monitor stopping");
        }
        self.join_threads();
    }

    /// Shared handle to the message index.
    pub fn index(&self) -> Arc<MessageIndex> {
        Arc::clone(&self.index)
    }

    /// Reconstruct the reply chain for a stored message, oldest first.
    /// Unknown identifiers yield an empty chain.
    pub fn chain(&self, message_id: &str) -> Vec<EmailMessage> {
        match self.index.get(message_id) {
            Some(message) => {
                ChainBuilder::with_gap_policy(Arc::clone(&self.index), self.config.gap_policy)
                    .build_chain(&message)
            }
            None => Vec::new(),
        }
    }

    /// Snapshot of each account's watcher state.
    pub fn account_status(&self) -> HashMap<String, WatcherState> {
        self.status
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    fn build_source(&self, account: &EmailAccount) -> Box<dyn MailSource> {
        match &self.source_factory {
            Some(factory) => factory(account),
            None => Box::new(ImapSource::new(account.clone(), self.config.auto_mark_seen)),
        }
    }

    fn join_threads(&mut self) {
        let current = thread::current().id();
        for handle in self.handles.drain(..) {
            // A callback calling stop() runs on the dispatcher thread;
            // never join the thread we are on.
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                tracing::error!("monitor worker thread panicked");
            }
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.join_threads();
    }
}

// ── Tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MockMailbox;
    use std::sync::Mutex;
    use std::time::Instant;

    const MAIL: &str = "\
From: alice@example.com\r\n\
To: bob@example.com\r\n\
Subject: Hi\r\n\
Message-ID: <m1@example.com>\r\n\
Date: Sat, 20 Nov 2021 14:22:01 -0800\r\n\
Content-Type: text/plain\r\n\
\r\n\
hello\r\n";

    fn accounts() -> Vec<EmailAccount> {
        vec![
            EmailAccount::new("alice@example.com", "pw", "imap.example.com"),
            EmailAccount::new("bob@example.com", "pw", "imap.example.com"),
        ]
    }

    fn fast_config() -> MonitorConfig {
        MonitorConfig {
            backoff_min: Duration::from_millis(5),
            backoff_max: Duration::from_millis(40),
            ..MonitorConfig::default()
        }
    }

    /// Route every account to the same mock mailbox.
    fn mock_factory(mailbox: &MockMailbox) -> SourceFactory {
        let mailbox = mailbox.clone();
        Box::new(move |_account| Box::new(mailbox.source()))
    }

    #[test]
    fn empty_account_list_is_rejected() {
        let result = Monitor::new(Vec::new(), |_m, _c| {});
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn invalid_account_is_rejected() {
        let bad = EmailAccount::new("", "pw", "imap.example.com");
        let result = Monitor::new(vec![bad], |_m, _c| {});
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn starting_twice_is_an_error() {
        let mailbox = MockMailbox::new();
        let mut monitor = Monitor::new(accounts(), |_m, _c| {})
            .unwrap()
            .with_config(fast_config())
            .with_source_factory(mock_factory(&mailbox));

        monitor.start_async().unwrap();
        assert!(matches!(
            monitor.start_async(),
            Err(Error::Config { .. })
        ));
        monitor.stop();
    }

    #[test]
    fn live_message_reaches_callback_with_chain() {
        let mailbox = MockMailbox::new();
        let seen: Arc<Mutex<Vec<(String, usize)>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_in_cb = Arc::clone(&seen);

        let mut monitor = Monitor::new(accounts(), move |message, chain| {
            seen_in_cb
                .lock()
                .unwrap()
                .push((message.message_id.clone(), chain.len()));
        })
        .unwrap()
        .with_config(fast_config())
        .with_source_factory(mock_factory(&mailbox));

        monitor.start_async().unwrap();

        // Let both watchers' initial (empty) sync pass so the delivery
        // counts as live traffic.
        let deadline = Instant::now() + Duration::from_secs(5);
        while mailbox.fetch_count() < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        mailbox.deliver_rfc822("1", MAIL);

        let deadline = Instant::now() + Duration::from_secs(5);
        while seen.lock().unwrap().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        monitor.stop();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], ("m1@example.com".to_string(), 1));
        assert!(monitor.index().contains("m1@example.com"));
    }

    #[test]
    fn chain_accessor_for_unknown_id_is_empty() {
        let monitor = Monitor::new(accounts(), |_m, _c| {}).unwrap();
        assert!(monitor.chain("<nope@example.com>").is_empty());
    }

    #[test]
    fn stop_is_idempotent() {
        let mailbox = MockMailbox::new();
        let mut monitor = Monitor::new(accounts(), |_m, _c| {})
            .unwrap()
            .with_config(fast_config())
            .with_source_factory(mock_factory(&mailbox));

        monitor.start_async().unwrap();
        monitor.stop();
        monitor.stop();
    }

    #[test]
    fn stop_handle_unblocks_start() {
        let mailbox = MockMailbox::new();
        let mut monitor = Monitor::new(accounts(), |_m, _c| {})
            .unwrap()
            .with_config(fast_config())
            .with_source_factory(mock_factory(&mailbox));

        let handle = monitor.stop_handle();
        let signaller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            handle.stop();
        });

        // Returns only because the handle raised the signal.
        monitor.start().unwrap();
        signaller.join().unwrap();
        assert!(monitor.stop_handle().is_stopped());
    }

    #[test]
    fn callback_can_stop_blocking_monitor() {
        let mailbox = MockMailbox::new();
        let slot: Arc<Mutex<Option<StopHandle>>> = Arc::new(Mutex::new(None));
        let slot_in_cb = Arc::clone(&slot);

        let mut monitor = Monitor::new(accounts(), move |_message, _chain| {
            if let Some(handle) = slot_in_cb.lock().unwrap().as_ref() {
                handle.stop();
            }
        })
        .unwrap()
        .with_config(fast_config())
        .with_source_factory(mock_factory(&mailbox));

        *slot.lock().unwrap() = Some(monitor.stop_handle());
        mailbox.deliver_rfc822("1", MAIL);

        // The pre-loaded message is silent; deliver live traffic from a
        // helper thread once the initial sync is done.
        let feeder_box = mailbox.clone();
        let feeder = thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(5);
            while feeder_box.fetch_count() < 2 && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(5));
            }
            feeder_box.deliver_rfc822(
                "2",
                "From: alice@example.com\r\n\
                 To: bob@example.com\r\n\
                 Subject: Again\r\n\
                 Message-ID: <m2@example.com>\r\n\
                 Date: Sat, 20 Nov 2021 15:00:00 -0800\r\n\
                 Content-Type: text/plain\r\n\
                 \r\n\
                 more\r\n",
            );
        });

        monitor.start().unwrap();
        feeder.join().unwrap();
        assert!(monitor.index().contains("m2@example.com"));
    }

    #[test]
    fn account_status_reports_terminal_states() {
        let mailbox = MockMailbox::new();
        let mut monitor = Monitor::new(accounts(), |_m, _c| {})
            .unwrap()
            .with_config(fast_config())
            .with_source_factory(mock_factory(&mailbox));

        monitor.start_async().unwrap();
        thread::sleep(Duration::from_millis(50));
        monitor.stop();

        let status = monitor.account_status();
        assert_eq!(status.len(), 2);
        for state in status.values() {
            assert_eq!(*state, WatcherState::Stopped);
        }
    }
}
