//! Account configuration: credentials and server endpoints for one mailbox.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default IMAPS port.
const DEFAULT_IMAP_PORT: u16 = 993;

/// Default SMTPS port.
const DEFAULT_SMTP_PORT: u16 = 465;

/// Configuration for one monitored email account.
///
/// IMAP settings are required (that is where the watch runs); SMTP settings
/// are optional and only needed when sending replies through [`crate::sender::EmailSender`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailAccount {
    /// Email address (e.g. "agent@example.com").
    pub email: String,
    /// Account password or app-specific password.
    pub password: String,
    /// IMAP server hostname.
    pub imap_host: String,
    /// IMAP server port (993 for IMAPS).
    #[serde(default = "default_imap_port")]
    pub imap_port: u16,
    /// SMTP server hostname, if this account also sends mail.
    #[serde(default)]
    pub smtp_host: Option<String>,
    /// SMTP server port (465 for SMTPS).
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
}

fn default_imap_port() -> u16 {
    DEFAULT_IMAP_PORT
}

fn default_smtp_port() -> u16 {
    DEFAULT_SMTP_PORT
}

impl EmailAccount {
    /// Create an account with default ports and no SMTP endpoint.
    pub fn new(
        email: impl Into<String>,
        password: impl Into<String>,
        imap_host: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            imap_host: imap_host.into(),
            imap_port: DEFAULT_IMAP_PORT,
            smtp_host: None,
            smtp_port: DEFAULT_SMTP_PORT,
        }
    }

    /// Set the SMTP endpoint, enabling outbound sending for this account.
    pub fn with_smtp(mut self, host: impl Into<String>, port: u16) -> Self {
        self.smtp_host = Some(host.into());
        self.smtp_port = port;
        self
    }

    /// Validate this configuration, returning an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.email.is_empty() || !self.email.contains('@') {
            return Err(Error::Config {
                message: format!("invalid email address: {:?}", self.email),
            });
        }
        if self.password.is_empty() {
            return Err(Error::Config {
                message: "password must not be empty".to_string(),
            });
        }
        if self.imap_host.is_empty() {
            return Err(Error::Config {
                message: "IMAP host must not be empty".to_string(),
            });
        }
        if self.imap_port == 0 {
            return Err(Error::Config {
                message: "IMAP port must be non-zero".to_string(),
            });
        }
        Ok(())
    }

    /// Whether an SMTP endpoint is configured for this account.
    pub fn has_smtp_config(&self) -> bool {
        self.smtp_host.as_deref().is_some_and(|h| !h.is_empty())
    }
}
