//! # email-threads
//!
//! Multi-account email monitoring with reply-chain reconstruction.
//!
//! A [`Monitor`] watches the inbox of every configured account over IMAP
//! IDLE, normalizes incoming MIME into [`EmailMessage`]s, and reconstructs
//! each message's reply chain from its `In-Reply-To` and `References`
//! headers. Relevant messages — traffic between the watched accounts — are
//! delivered to a single consumer callback together with their chain,
//! oldest first, one invocation at a time.
//!
//! ## Architecture
//!
//! - **Accounts** (`account`): per-mailbox credentials and endpoints
//! - **Sources** (`source`): the inbound endpoint boundary — IMAP over TLS,
//!   plus an in-memory mock for tests
//! - **Watchers** (`watcher`): one thread per account; idle, fetch, emit,
//!   reconnect with jittered backoff
//! - **Dispatch** (`dispatch`): single consumer serializing all accounts
//!   into one callback stream
//! - **Index & chains** (`index`, `chain`): concurrent message store and
//!   reply-chain reconstruction over it
//! - **Outbound** (`compose`, `sender`): replies with correct threading
//!   headers, submitted over SMTP
//!
//! ## Library usage
//!
//! ```no_run
//! use email_threads::{EmailAccount, Monitor};
//!
//! # fn main() -> email_threads::Result<()> {
//! let accounts = vec![
//!     EmailAccount::new("alice@example.com", "app-password", "imap.example.com"),
//!     EmailAccount::new("bob@example.com", "app-password", "imap.example.com"),
//! ];
//! let mut monitor = Monitor::new(accounts, |message, chain| {
//!     println!(
//!         "{} -> {:?}: \"{}\" (chain of {})",
//!         message.from,
//!         message.to,
//!         message.subject,
//!         chain.len(),
//!     );
//! })?;
//! let stop = monitor.stop_handle(); // clone into a callback or ctrl-c hook
//! monitor.start()?; // blocks until the handle raises the stop signal
//! # Ok(())
//! # }
//! ```

pub mod account;
pub mod chain;
pub mod compose;
pub mod dispatch;
pub mod error;
pub mod index;
pub mod message;
pub mod monitor;
pub mod parser;
pub mod sender;
pub mod source;
pub mod watcher;

pub use account::EmailAccount;
pub use chain::{ChainBuilder, GapPolicy};
pub use compose::{ComposedEmail, compose_new, compose_reply, to_mime};
pub use dispatch::DrainPolicy;
pub use error::{Error, Result};
pub use index::MessageIndex;
pub use message::EmailMessage;
pub use monitor::{Monitor, MonitorConfig, SourceFactory, StopHandle};
pub use sender::EmailSender;
pub use source::{IdleOutcome, ImapSource, MailSource, MockMailbox, MockSource, RawMail};
pub use watcher::WatcherState;
