//! Email delivery via SMTP.
//!
//! [`EmailAdapter`] renders a template for the notification and hands it to
//! a [`MailTransport`]. The production transport is [`SmtpMailer`], built on
//! the `lettre` async SMTP client. Configuration is loaded from environment
//! variables; if `SMTP_HOST` is not set, [`EmailConfig::from_env`] returns
//! `None`, no transport is built, and every email attempt is a soft failure.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use herald_core::channels::DeliveryMethod;
use herald_core::error::CoreError;
use herald_core::policy::Frequency;
use herald_core::types::DbId;
use herald_db::models::notification::Notification;
use herald_db::models::recipient::Recipient;
use herald_db::SharedStore;

use super::templates::{self, RenderedEmail};
use super::{ChannelAdapter, DeliveryOutcome};

/// Failure detail recorded when no SMTP transport is configured.
pub const EMAIL_NOT_CONFIGURED: &str = "email_not_configured";

/// Failure detail recorded when the user has no email address.
pub const NO_EMAIL_ADDRESS: &str = "no_email_address";

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Error type for email delivery failures.
#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    /// SMTP transport-level failure (authentication, connection, etc.).
    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),

    /// The recipient or sender address could not be parsed.
    #[error("Email address parse error: {0}")]
    Address(#[from] lettre::address::AddressError),

    /// The MIME message could not be assembled.
    #[error("Email build error: {0}")]
    Build(String),
}

// ---------------------------------------------------------------------------
// EmailConfig
// ---------------------------------------------------------------------------

/// Default SMTP port (STARTTLS).
const DEFAULT_SMTP_PORT: u16 = 587;

/// Default sender address when `SMTP_FROM` is not set.
const DEFAULT_FROM_ADDRESS: &str = "noreply@herald.local";

/// Default per-command SMTP timeout.
const DEFAULT_SMTP_TIMEOUT_SECS: u64 = 10;

/// Configuration for the SMTP transport.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    /// RFC 5322 "From" address.
    pub from_address: String,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
    pub timeout: Duration,
}

impl EmailConfig {
    /// Load configuration from environment variables.
    ///
    /// Returns `None` if `SMTP_HOST` is not set, signalling that email
    /// delivery is not configured.
    ///
    /// | Variable            | Required | Default                 |
    /// |---------------------|----------|-------------------------|
    /// | `SMTP_HOST`         | yes      |                         |
    /// | `SMTP_PORT`         | no       | `587`                   |
    /// | `SMTP_FROM`         | no       | `noreply@herald.local`  |
    /// | `SMTP_USER`         | no       |                         |
    /// | `SMTP_PASSWORD`     | no       |                         |
    /// | `SMTP_TIMEOUT_SECS` | no       | `10`                    |
    pub fn from_env() -> Option<Self> {
        let smtp_host = std::env::var("SMTP_HOST").ok()?;
        Some(Self {
            smtp_host,
            smtp_port: std::env::var("SMTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_SMTP_PORT),
            from_address: std::env::var("SMTP_FROM")
                .unwrap_or_else(|_| DEFAULT_FROM_ADDRESS.to_string()),
            smtp_user: std::env::var("SMTP_USER").ok(),
            smtp_password: std::env::var("SMTP_PASSWORD").ok(),
            timeout: Duration::from_secs(
                std::env::var("SMTP_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_SMTP_TIMEOUT_SECS),
            ),
        })
    }
}

// ---------------------------------------------------------------------------
// MailTransport
// ---------------------------------------------------------------------------

/// Something that can put a rendered email on the wire.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, to: &str, email: &RenderedEmail) -> Result<(), EmailError>;
}

/// [`MailTransport`] over SMTP with STARTTLS.
pub struct SmtpMailer {
    from_address: lettre::message::Mailbox,
    mailer: lettre::AsyncSmtpTransport<lettre::Tokio1Executor>,
}

impl SmtpMailer {
    pub fn new(config: &EmailConfig) -> Result<Self, EmailError> {
        use lettre::transport::smtp::authentication::Credentials;
        use lettre::{AsyncSmtpTransport, Tokio1Executor};

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
            .port(config.smtp_port)
            .timeout(Some(config.timeout));

        if let (Some(user), Some(pass)) = (&config.smtp_user, &config.smtp_password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            from_address: config.from_address.parse()?,
            mailer: builder.build(),
        })
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, to: &str, email: &RenderedEmail) -> Result<(), EmailError> {
        use lettre::message::MultiPart;
        use lettre::{AsyncTransport, Message};

        let message = Message::builder()
            .from(self.from_address.clone())
            .to(to.parse()?)
            .subject(email.subject.clone())
            .multipart(MultiPart::alternative_plain_html(
                email.text.clone(),
                email.html.clone(),
            ))
            .map_err(|e| EmailError::Build(e.to_string()))?;

        self.mailer.send(message).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// EmailAdapter
// ---------------------------------------------------------------------------

pub struct EmailAdapter {
    store: SharedStore,
    transport: Option<Arc<dyn MailTransport>>,
}

impl EmailAdapter {
    /// `transport = None` means email is not configured in this environment.
    pub fn new(store: SharedStore, transport: Option<Arc<dyn MailTransport>>) -> Self {
        Self { store, transport }
    }

    pub fn is_configured(&self) -> bool {
        self.transport.is_some()
    }

    /// Send a digest of `notifications` to the recipient.
    pub async fn send_digest(
        &self,
        recipient: &Recipient,
        frequency: Frequency,
        notifications: &[Notification],
    ) -> DeliveryOutcome {
        match templates::render_digest(frequency, recipient.greeting_name(), notifications) {
            Some(email) => self.deliver(recipient, &email).await,
            None => DeliveryOutcome::failed(format!("no digest template for '{frequency}'")),
        }
    }

    /// Send a test email to a user, verifying the transport end to end.
    ///
    /// Fails with not-found when the user is unknown; transport problems are
    /// reported in the outcome.
    pub async fn send_test_email(&self, user_id: DbId) -> Result<DeliveryOutcome, CoreError> {
        let recipient = self
            .store
            .find_recipient(user_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "User",
                id: user_id,
            })?;
        let email = templates::test_email(recipient.greeting_name());
        Ok(self.deliver(&recipient, &email).await)
    }

    async fn deliver(&self, recipient: &Recipient, email: &RenderedEmail) -> DeliveryOutcome {
        let Some(transport) = &self.transport else {
            tracing::debug!(user_id = recipient.user_id, "Email not configured, skipping");
            return DeliveryOutcome::failed(EMAIL_NOT_CONFIGURED);
        };
        let Some(address) = recipient.email.as_deref() else {
            return DeliveryOutcome::failed(NO_EMAIL_ADDRESS);
        };

        match transport.send(address, email).await {
            Ok(()) => {
                tracing::info!(user_id = recipient.user_id, subject = %email.subject, "Email sent");
                DeliveryOutcome::sent()
            }
            Err(e) => {
                tracing::warn!(user_id = recipient.user_id, error = %e, "Email delivery failed");
                DeliveryOutcome::failed(e.to_string())
            }
        }
    }
}

#[async_trait]
impl ChannelAdapter for EmailAdapter {
    fn method(&self) -> DeliveryMethod {
        DeliveryMethod::Email
    }

    async fn send(&self, recipient: &Recipient, notification: &Notification) -> DeliveryOutcome {
        let email = templates::render_notification(recipient.greeting_name(), notification);
        self.deliver(recipient, &email).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
