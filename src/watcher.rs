//! Per-account watch loop: connect, idle, fetch, emit.
//!
//! One watcher runs on one dedicated thread per configured account. It
//! keeps a long-lived session against the account's inbound endpoint,
//! renews the idle wait in bounded slices (so the stop signal is honored
//! promptly and the server never expires an unattended wait), and emits
//! every newly observed message into the dispatcher queue in server order.
//!
//! Transient failures reconnect with jittered exponential backoff;
//! authentication rejections are terminal for this account only.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::SyncSender;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rand::Rng;

use crate::account::EmailAccount;
use crate::error::{Error, Result};
use crate::message::EmailMessage;
use crate::parser;
use crate::source::{IdleOutcome, MailSource};

/// Default idle-wait slice. Also bounds how long a stop signal can go
/// unobserved while a watcher is parked in a wait.
pub(crate) const DEFAULT_IDLE_SLICE: Duration = Duration::from_secs(30);

/// Default session renewal bound: tear the session down and reconnect
/// before servers start expiring it (~30 minutes is common).
pub(crate) const DEFAULT_SESSION_LIFETIME: Duration = Duration::from_secs(25 * 60);

/// Connected time after which the reconnect backoff resets to its minimum.
const BACKOFF_RESET_AFTER: Duration = Duration::from_secs(60);

/// Timing knobs for one watcher, taken from the monitor configuration.
#[derive(Debug, Clone)]
pub(crate) struct WatcherTuning {
    pub idle_slice: Duration,
    pub session_lifetime: Duration,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
}

// ── WatcherState ────────────────────────────────────────────────────────

/// Lifecycle state of one account watcher, exposed on the monitor's
/// status surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatcherState {
    /// No session; about to connect or waiting out a backoff delay.
    Disconnected,
    /// Opening a session.
    Connecting,
    /// Parked in an idle wait for new-mail notifications.
    Idling,
    /// Fetching and emitting new messages.
    Fetching,
    /// Terminal: permanent failure (bad credentials); not retried.
    Failed(String),
    /// Terminal: stop signal observed.
    Stopped,
}

// ── WatcherOutput ───────────────────────────────────────────────────────

/// One normalized message emitted by a watcher into the dispatcher queue.
#[derive(Debug)]
pub(crate) struct WatcherOutput {
    /// Address of the account that observed the message.
    pub account: String,
    pub message: EmailMessage,
    /// Pre-load traffic from the first sync: indexed for chain
    /// completeness but never delivered to the consumer callback.
    pub silent: bool,
}

// ── Backoff ─────────────────────────────────────────────────────────────

/// Bounded exponential backoff with ±50% jitter.
///
/// Jitter keeps watchers for many accounts from reconnecting in lockstep
/// after a shared outage.
#[derive(Debug)]
pub(crate) struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max,
            current: min,
        }
    }

    /// The next delay to wait, advancing the exponential schedule.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = (self.current * 2).min(self.max);
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        base.mul_f64(jitter)
    }

    /// Reset to the minimum after a sustained successful period.
    pub fn reset(&mut self) {
        self.current = self.min;
    }
}

// ── AccountWatcher ──────────────────────────────────────────────────────

/// How one session ended, seen from the outer reconnect loop.
enum SessionEnd {
    /// Stop signal observed.
    Stopped,
    /// Session lifetime bound reached; reconnect without backoff.
    Renew,
    /// Retryable failure; reconnect after backoff.
    Failed(Error),
}

/// The watch loop for a single account.
pub(crate) struct AccountWatcher {
    account: EmailAccount,
    tx: SyncSender<WatcherOutput>,
    stop: Arc<AtomicBool>,
    status: Arc<DashMap<String, WatcherState>>,
    tuning: WatcherTuning,
}

impl AccountWatcher {
    pub fn new(
        account: EmailAccount,
        tx: SyncSender<WatcherOutput>,
        stop: Arc<AtomicBool>,
        status: Arc<DashMap<String, WatcherState>>,
        tuning: WatcherTuning,
    ) -> Self {
        Self {
            account,
            tx,
            stop,
            status,
            tuning,
        }
    }

    /// Run until the stop signal is raised or a permanent failure occurs.
    ///
    /// The very first successful fetch primes the index silently (messages
    /// already waiting in the inbox complete chains but trigger no
    /// callbacks); everything after that is live traffic.
    pub fn run(&self, mut source: Box<dyn MailSource>) {
        let email = self.account.email.clone();
        let mut backoff = Backoff::new(self.tuning.backoff_min, self.tuning.backoff_max);
        let mut initial_sync = true;

        tracing::info!(account = %email, "account watcher starting");

        while !self.stopped() {
            self.set_state(WatcherState::Connecting);
            if let Err(e) = source.connect() {
                if e.is_fatal() {
                    tracing::error!(
                        account = %email,
                        error = %e,
                        "permanent failure, account watcher giving up"
                    );
                    self.set_state(WatcherState::Failed(e.to_string()));
                    return;
                }
                tracing::warn!(account = %email, error = %e, "connect failed, will retry");
                self.set_state(WatcherState::Disconnected);
                self.sleep_backoff(&mut backoff);
                continue;
            }

            tracing::info!(account = %email, "session established");
            let connected_at = Instant::now();

            let end = self.session_loop(source.as_mut(), &mut initial_sync);
            source.disconnect();

            match end {
                SessionEnd::Stopped => break,
                SessionEnd::Renew => {
                    tracing::debug!(account = %email, "renewing session before expiry");
                    backoff.reset();
                }
                SessionEnd::Failed(e) => {
                    if connected_at.elapsed() >= BACKOFF_RESET_AFTER {
                        backoff.reset();
                    }
                    tracing::warn!(account = %email, error = %e, "session lost, reconnecting");
                    self.set_state(WatcherState::Disconnected);
                    self.sleep_backoff(&mut backoff);
                }
            }
        }

        tracing::info!(account = %email, "account watcher stopped");
        self.set_state(WatcherState::Stopped);
    }

    /// Drive one connected session: initial catch-up fetch, then the idle
    /// loop with slice renewal.
    fn session_loop(&self, source: &mut dyn MailSource, initial_sync: &mut bool) -> SessionEnd {
        self.set_state(WatcherState::Fetching);
        let silent = *initial_sync;
        if let Err(e) = self.fetch_and_emit(source, silent) {
            return SessionEnd::Failed(e);
        }
        *initial_sync = false;

        let session_start = Instant::now();
        loop {
            if self.stopped() {
                return SessionEnd::Stopped;
            }
            if session_start.elapsed() >= self.tuning.session_lifetime {
                return SessionEnd::Renew;
            }

            self.set_state(WatcherState::Idling);
            match source.idle_wait(self.tuning.idle_slice) {
                Ok(IdleOutcome::NewMail) => {
                    self.set_state(WatcherState::Fetching);
                    if let Err(e) = self.fetch_and_emit(source, false) {
                        return SessionEnd::Failed(e);
                    }
                }
                Ok(IdleOutcome::Timeout) => {
                    // Wait slice elapsed; loop re-issues the idle, which
                    // renews it server-side.
                }
                Err(e) => return SessionEnd::Failed(e),
            }
        }
    }

    /// Fetch new raw messages, normalize them, and emit in server order.
    fn fetch_and_emit(&self, source: &mut dyn MailSource, silent: bool) -> Result<()> {
        let raws = source.fetch_new()?;
        if raws.is_empty() {
            return Ok(());
        }
        tracing::debug!(
            account = %self.account.email,
            count = raws.len(),
            silent,
            "fetched new messages"
        );

        for raw in &raws {
            match parser::to_message(raw) {
                Ok(message) => {
                    let out = WatcherOutput {
                        account: self.account.email.clone(),
                        message,
                        silent,
                    };
                    if self.tx.send(out).is_err() {
                        // Dispatcher gone; the monitor is tearing down.
                        return Ok(());
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        account = %self.account.email,
                        uid = %raw.uid,
                        error = %e,
                        "unparseable message skipped"
                    );
                }
            }
        }
        Ok(())
    }

    /// Sleep out a backoff delay, waking early if the stop signal rises.
    fn sleep_backoff(&self, backoff: &mut Backoff) {
        let delay = backoff.next_delay();
        tracing::debug!(
            account = %self.account.email,
            delay_ms = delay.as_millis() as u64,
            "backing off before reconnect"
        );
        let deadline = Instant::now() + delay;
        while !self.stopped() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20).min(delay));
        }
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: WatcherState) {
        self.status.insert(self.account.email.clone(), state);
    }
}

// ── Tests ───────────────────────────────────────────────────────────────
