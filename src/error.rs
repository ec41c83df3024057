//! Error types for the monitoring pipeline, with miette diagnostics.
//!
//! The taxonomy follows the retry policy: `Connection` is transient and
//! retried with backoff, `Authentication` is permanent and takes the
//! affected watcher to its terminal `Failed` state, `Parse` degrades to
//! best-effort defaults, and `Send`/`Config` surface to the caller.

use miette::Diagnostic;
use thiserror::Error;

/// Errors produced by the email-threads pipeline.
#[derive(Debug, Error, Diagnostic)]
pub enum Error {
    #[error("mail server connection failed: {message}")]
    #[diagnostic(
        code(email_threads::connection),
        help(
            "Check that the mail server is reachable and the host/port are correct. \
             Transient network failures are retried automatically with backoff."
        )
    )]
    Connection { message: String },

    #[error("authentication failed: {message}")]
    #[diagnostic(
        code(email_threads::auth),
        help(
            "The server rejected the credentials. Check the account password (or app \
             password). This error is not retried — the account watcher stops."
        )
    )]
    Authentication { message: String },

    #[error("message parsing failed: {message}")]
    #[diagnostic(
        code(email_threads::parse),
        help(
            "The raw message could not be parsed as RFC 5322 at all. Messages with \
             merely malformed or missing headers are kept with default values instead."
        )
    )]
    Parse { message: String },

    #[error("email send failed: {message}")]
    #[diagnostic(
        code(email_threads::send),
        help(
            "SMTP delivery failed. Check the SMTP server configuration, credentials, \
             and that the recipient addresses are valid."
        )
    )]
    Send { message: String },

    #[error("configuration invalid: {message}")]
    #[diagnostic(
        code(email_threads::config),
        help(
            "Check the account configuration: a non-empty email address containing \
             '@', a non-empty password, and a non-empty IMAP host are required."
        )
    )]
    Config { message: String },
}

impl Error {
    /// Whether this error is permanent and must not be retried.
    ///
    /// Only authentication rejections are fatal; everything else either
    /// retries (connection) or degrades (parse).
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Authentication { .. })
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
