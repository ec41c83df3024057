//! Outbound delivery over SMTP via `lettre`.
//!
//! [`EmailSender`] submits [`ComposedEmail`]s for one account and returns
//! the Message-ID of what was sent, so callers can correlate replies that
//! come back through the monitor with mail they sent themselves.

use lettre::transport::smtp::SmtpTransport;
use lettre::transport::smtp::authentication::Credentials;
use lettre::Transport;
use rand::Rng;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::account::EmailAccount;
use crate::compose::{self, ComposedEmail};
use crate::error::{Error, Result};
use crate::message::EmailMessage;

/// SMTP submission for one account.
pub struct EmailSender {
    account: EmailAccount,
}

impl EmailSender {
    /// Create a sender for `account`.
    ///
    /// Fails with [`Error::Config`] when the account has no SMTP endpoint
    /// configured.
    pub fn new(account: EmailAccount) -> Result<Self> {
        if !account.has_smtp_config() {
            return Err(Error::Config {
                message: format!("account {} has no SMTP host configured", account.email),
            });
        }
        Ok(Self { account })
    }

    /// Send a composed email. Returns the Message-ID it was sent under.
    pub fn send(&self, email: &ComposedEmail) -> Result<String> {
        let message_id = self.generate_message_id();
        let message = compose::build_mime(email, &self.account.email, Some(message_id.clone()))?;

        let transport = self.transport()?;
        transport.send(&message).map_err(|e| Error::Send {
            message: format!("SMTP delivery failed: {e}"),
        })?;

        tracing::info!(
            account = %self.account.email,
            message_id = %message_id,
            to = ?email.to,
            "email sent"
        );
        Ok(message_id)
    }

    /// Compose and send a reply to `original` with correct threading
    /// headers. Returns the sent Message-ID.
    pub fn send_reply(&self, original: &EmailMessage, body: &str) -> Result<String> {
        let reply = compose::compose_reply(original, body);
        self.send(&reply)
    }

    /// Compose and send a new (non-reply) email. Returns the sent
    /// Message-ID.
    pub fn send_new(&self, to: Vec<String>, subject: &str, body: &str) -> Result<String> {
        let email = compose::compose_new(to, subject, body);
        self.send(&email)
    }

    fn transport(&self) -> Result<SmtpTransport> {
        // new() guarantees the host is present.
        let host = self.account.smtp_host.as_deref().unwrap_or_default();
        let transport = SmtpTransport::relay(host)
            .map_err(|e| Error::Connection {
                message: format!("SMTP relay setup for {host} failed: {e}"),
            })?
            .port(self.account.smtp_port)
            .credentials(Credentials::new(
                self.account.email.clone(),
                self.account.password.clone(),
            ))
            .build();
        Ok(transport)
    }

    /// A unique Message-ID under the sender's domain:
    /// `<{nanos}.{random}@{domain}>`.
    fn generate_message_id(&self) -> String {
        let domain = self
            .account
            .email
            .rsplit('@')
            .next()
            .unwrap_or("localhost");
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let nonce: u64 = rand::thread_rng().r#gen();
        format!("<{nanos}.{nonce:016x}@{domain}>")
    }
}

impl std::fmt::Debug for EmailSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailSender")
            .field("account", &self.account.email)
            .field("smtp_host", &self.account.smtp_host)
            .field("smtp_port", &self.account.smtp_port)
            .finish()
    }
}

// ── Tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn smtp_account() -> EmailAccount {
        EmailAccount::new("alice@example.com", "secret", "imap.example.com")
            .with_smtp("smtp.example.com", 465)
    }

    #[test]
    fn sender_requires_smtp_config() {
        let account = EmailAccount::new("alice@example.com", "secret", "imap.example.com");
        let result = EmailSender::new(account);
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn sender_accepts_smtp_account() {
        assert!(EmailSender::new(smtp_account()).is_ok());
    }

    #[test]
    fn generated_message_id_uses_sender_domain() {
        let sender = EmailSender::new(smtp_account()).unwrap();
        let id = sender.generate_message_id();
        assert!(id.starts_with('<'));
        assert!(id.ends_with("@example.com>"));
    }

    #[test]
    fn generated_message_ids_are_unique() {
        let sender = EmailSender::new(smtp_account()).unwrap();
        let a = sender.generate_message_id();
        let b = sender.generate_message_id();
        assert_ne!(a, b);
    }
}
