//! Inbound mail endpoint capability: trait + IMAP and mock implementations.
//!
//! [`MailSource`] is the boundary the account watcher drives: open a
//! session, wait for new-mail notifications in renewable slices, fetch the
//! new messages, close. [`ImapSource`] speaks IMAP over TLS with IDLE;
//! [`MockMailbox`]/[`MockSource`] provide an in-memory endpoint for tests.

use std::collections::VecDeque;
use std::net::TcpStream;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use imap::extensions::idle::WaitOutcome;

use crate::account::EmailAccount;
use crate::error::{Error, Result};

/// Mailbox watched on every account.
const INBOX: &str = "INBOX";

// ── RawMail ─────────────────────────────────────────────────────────────

/// A raw message as fetched from the mail server, before normalization.
#[derive(Debug, Clone)]
pub struct RawMail {
    /// Server-assigned unique identifier (IMAP UID).
    pub uid: String,
    /// The mailbox this message was fetched from.
    pub mailbox: String,
    /// Raw RFC 5322 message bytes.
    pub data: Vec<u8>,
}

// ── IdleOutcome ─────────────────────────────────────────────────────────

/// Result of one bounded idle-wait slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleOutcome {
    /// The server signalled new mail; fetch it.
    NewMail,
    /// The wait slice elapsed without news; renew the wait.
    Timeout,
}

// ── MailSource trait ────────────────────────────────────────────────────

/// Capability offered by an inbound mail endpoint.
///
/// Implementations must be `Send`: each account watcher owns its source on
/// a dedicated thread. One `idle_wait` call is one renewable wait slice;
/// the watcher re-issues it well before the server-side expiry bound.
pub trait MailSource: Send {
    /// Open a session. Authentication rejections map to
    /// [`Error::Authentication`] (fatal); everything else to
    /// [`Error::Connection`] (retried).
    fn connect(&mut self) -> Result<()>;

    /// Wait up to `timeout` for a new-mail notification.
    fn idle_wait(&mut self, timeout: Duration) -> Result<IdleOutcome>;

    /// Fetch messages not yet returned by a previous call, in server
    /// order. Must not redeliver across reconnects of the same source.
    fn fetch_new(&mut self) -> Result<Vec<RawMail>>;

    /// Close the session, best effort.
    fn disconnect(&mut self);
}

// ── ImapSource ──────────────────────────────────────────────────────────

type TlsSession = imap::Session<native_tls::TlsStream<TcpStream>>;

/// IMAP endpoint using the `imap` crate over `native-tls`.
///
/// Selects INBOX read-only (EXAMINE) unless `auto_mark_seen` is set, waits
/// with IDLE, and tracks the highest seen UID so reconnects never redeliver
/// messages fetched before a disconnect.
pub struct ImapSource {
    account: EmailAccount,
    auto_mark_seen: bool,
    session: Option<TlsSession>,
    /// UID high-water mark for delta fetches.
    last_uid: Option<u32>,
}

impl ImapSource {
    /// Create an IMAP source for one account (does not connect yet).
    pub fn new(account: EmailAccount, auto_mark_seen: bool) -> Self {
        Self {
            account,
            auto_mark_seen,
            session: None,
            last_uid: None,
        }
    }

    fn session(&mut self) -> Result<&mut TlsSession> {
        self.session.as_mut().ok_or_else(|| Error::Connection {
            message: "not connected — call connect() first".to_string(),
        })
    }
}

impl std::fmt::Debug for ImapSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImapSource")
            .field("account", &self.account.email)
            .field("host", &self.account.imap_host)
            .field("connected", &self.session.is_some())
            .field("last_uid", &self.last_uid)
            .finish()
    }
}

impl MailSource for ImapSource {
    fn connect(&mut self) -> Result<()> {
        let tls = native_tls::TlsConnector::builder()
            .build()
            .map_err(|e| Error::Connection {
                message: format!("TLS connector build failed: {e}"),
            })?;

        let addr = (&*self.account.imap_host, self.account.imap_port);
        let client = imap::connect(addr, &self.account.imap_host, &tls).map_err(|e| {
            Error::Connection {
                message: format!("IMAP connection failed: {e}"),
            }
        })?;

        let mut session = client
            .login(&self.account.email, &self.account.password)
            .map_err(|e| Error::Authentication {
                message: format!("IMAP login failed: {}", e.0),
            })?;

        if self.auto_mark_seen {
            session.select(INBOX).map_err(|e| Error::Connection {
                message: format!("IMAP SELECT {INBOX} failed: {e}"),
            })?;
        } else {
            // Read-only, so fetching never flips \Seen.
            session.examine(INBOX).map_err(|e| Error::Connection {
                message: format!("IMAP EXAMINE {INBOX} failed: {e}"),
            })?;
        }

        self.session = Some(session);
        Ok(())
    }

    fn idle_wait(&mut self, timeout: Duration) -> Result<IdleOutcome> {
        let session = self.session()?;
        let idle = session.idle().map_err(|e| Error::Connection {
            message: format!("IMAP IDLE failed: {e}"),
        })?;

        map_wait_outcome(idle.wait_with_timeout(timeout))
    }

    fn fetch_new(&mut self) -> Result<Vec<RawMail>> {
        let last_uid = self.last_uid;
        let mark_seen = self.auto_mark_seen;
        let session = self.session()?;

        let query = match last_uid {
            Some(uid) => format!("UID {}:* UNSEEN", uid + 1),
            None => "UNSEEN".to_string(),
        };
        let uids = session.uid_search(&query).map_err(|e| Error::Connection {
            message: format!("IMAP UID SEARCH failed: {e}"),
        })?;

        // "n:*" always matches the highest UID even when it is below n, so
        // filter explicitly, and sort for server (arrival) order.
        let mut uids: Vec<u32> = uids
            .into_iter()
            .filter(|&uid| last_uid.is_none_or(|last| uid > last))
            .collect();
        uids.sort_unstable();

        if uids.is_empty() {
            return Ok(Vec::new());
        }

        let uid_set = uids
            .iter()
            .map(|u| u.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let query_item = if mark_seen { "RFC822" } else { "BODY.PEEK[]" };
        let fetches = session
            .uid_fetch(&uid_set, query_item)
            .map_err(|e| Error::Connection {
                message: format!("IMAP UID FETCH failed: {e}"),
            })?;

        let mut mails = Vec::new();
        for fetch in fetches.iter() {
            if let (Some(uid), Some(body)) = (fetch.uid, fetch.body()) {
                mails.push(RawMail {
                    uid: uid.to_string(),
                    mailbox: INBOX.to_string(),
                    data: body.to_vec(),
                });
                if self.last_uid.is_none_or(|last| last < uid) {
                    self.last_uid = Some(uid);
                }
            }
        }
        mails.sort_by_key(|m| m.uid.parse::<u32>().unwrap_or(0));

        Ok(mails)
    }

    fn disconnect(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.logout().ok();
        }
    }
}

/// Translate an IDLE wait result into an [`IdleOutcome`].
fn map_wait_outcome(outcome: imap::error::Result<WaitOutcome>) -> Result<IdleOutcome> {
    match outcome {
        Ok(WaitOutcome::MailboxChanged) => Ok(IdleOutcome::NewMail),
        Ok(WaitOutcome::TimedOut) => Ok(IdleOutcome::Timeout),
        Err(e) => Err(Error::Connection {
            message: format!("IMAP IDLE wait failed: {e}"),
        }),
    }
}

// ── MockMailbox / MockSource ────────────────────────────────────────────

#[derive(Debug, Default)]
struct MockState {
    queue: VecDeque<RawMail>,
    /// Fail the next N connect attempts with a transient error.
    connect_failures: u32,
    /// Fail every connect attempt with an authentication error.
    auth_failure: bool,
    /// Fail the next N idle waits with a transient error.
    idle_failures: u32,
    connects: u32,
    fetches: u32,
}

/// Cloneable test handle for an in-memory mail endpoint.
///
/// Deliver messages and script failures from the test thread while a
/// watcher drives the paired [`MockSource`] on its own thread.
#[derive(Debug, Clone, Default)]
pub struct MockMailbox {
    state: Arc<Mutex<MockState>>,
}

impl MockMailbox {
    /// Create an empty mock endpoint.
    pub fn new() -> Self {
        Self::default()
    }

    /// A [`MailSource`] backed by this mailbox's state.
    pub fn source(&self) -> MockSource {
        MockSource {
            state: Arc::clone(&self.state),
        }
    }

    /// Deliver a raw message, as if it just arrived on the server.
    pub fn deliver(&self, raw: RawMail) {
        self.state.lock().unwrap().queue.push_back(raw);
    }

    /// Deliver an RFC 5322 message given as text.
    pub fn deliver_rfc822(&self, uid: &str, rfc822: &str) {
        self.deliver(RawMail {
            uid: uid.to_string(),
            mailbox: INBOX.to_string(),
            data: rfc822.as_bytes().to_vec(),
        });
    }

    /// Make the next `n` connect attempts fail with a transient error.
    pub fn fail_connects(&self, n: u32) {
        self.state.lock().unwrap().connect_failures = n;
    }

    /// Make every connect attempt fail with an authentication error.
    pub fn fail_auth(&self) {
        self.state.lock().unwrap().auth_failure = true;
    }

    /// Make the next idle wait fail with a transient error (forcing the
    /// watcher to reconnect).
    pub fn fail_next_idle(&self) {
        self.state.lock().unwrap().idle_failures += 1;
    }

    /// Number of connect attempts observed so far.
    pub fn connect_count(&self) -> u32 {
        self.state.lock().unwrap().connects
    }

    /// Number of fetch calls observed so far.
    pub fn fetch_count(&self) -> u32 {
        self.state.lock().unwrap().fetches
    }
}

/// In-memory [`MailSource`] for tests, paired with a [`MockMailbox`].
#[derive(Debug)]
pub struct MockSource {
    state: Arc<Mutex<MockState>>,
}

impl MailSource for MockSource {
    fn connect(&mut self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.connects += 1;
        if state.auth_failure {
            return Err(Error::Authentication {
                message: "mock credentials rejected".to_string(),
            });
        }
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(Error::Connection {
                message: "mock connect failure".to_string(),
            });
        }
        Ok(())
    }

    fn idle_wait(&mut self, timeout: Duration) -> Result<IdleOutcome> {
        {
            let mut state = self.state.lock().unwrap();
            if state.idle_failures > 0 {
                state.idle_failures -= 1;
                return Err(Error::Connection {
                    message: "mock idle failure".to_string(),
                });
            }
            if !state.queue.is_empty() {
                return Ok(IdleOutcome::NewMail);
            }
        }
        // Poll briefly instead of holding the lock for the full slice.
        std::thread::sleep(timeout.min(Duration::from_millis(5)));
        let state = self.state.lock().unwrap();
        if state.queue.is_empty() {
            Ok(IdleOutcome::Timeout)
        } else {
            Ok(IdleOutcome::NewMail)
        }
    }

    fn fetch_new(&mut self) -> Result<Vec<RawMail>> {
        let mut state = self.state.lock().unwrap();
        state.fetches += 1;
        Ok(state.queue.drain(..).collect())
    }

    fn disconnect(&mut self) {}
}

// ── Tests ───────────────────────────────────────────────────────────────
