//! Mismatch alerts and the email transport that delivers them.

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;
use tracing::{error, info};
use vigil_config::EmailConfig;
use vigil_core::now_utc_iso;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("alert transport not configured: {0}")]
    Config(String),

    #[error("invalid email address `{0}`")]
    Address(String),

    #[error("failed to build alert message: {0}")]
    Build(String),

    #[error("alert delivery failed: {0}")]
    Delivery(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertMessage {
    pub subject: String,
    pub html_body: String,
}

/// Format the alert for `resident_id` after `mismatch_count` consecutive
/// disagreements, stamped with `timestamp`.
pub fn mismatch_alert(resident_id: &str, mismatch_count: u32, timestamp: &str) -> AlertMessage {
    let subject = format!("Server Monitor Alert - Resident {resident_id}");
    let html_body = format!(
        "<html>\n  <body>\n    <h2>{subject}</h2>\n    \
         <p><strong>Resident:</strong> {resident_id}</p>\n    \
         <p><strong>Issue:</strong> WebDAV upload status and portal status do not match. \
         The sensor server may not be processing notifications.</p>\n    \
         <p><strong>Consecutive Mismatches:</strong> {mismatch_count}</p>\n    \
         <p><strong>Timestamp:</strong> {timestamp}</p>\n  </body>\n</html>\n"
    );
    AlertMessage { subject, html_body }
}

/// Delivers a rendered alert to a recipient list.
#[async_trait]
pub trait AlertTransport: Send + Sync {
    async fn send(&self, message: &AlertMessage, recipients: &[String]) -> Result<(), NotificationError>;
}

/// What the reconciler calls once a resident crosses the alert threshold.
#[async_trait]
pub trait AlertNotifier: Send + Sync {
    async fn notify(&self, resident_id: &str, mismatch_count: u32) -> Result<(), NotificationError>;
}

/// Formats mismatch alerts and hands them to a transport.  Failures are
/// logged and returned, never panicked.
#[derive(Debug)]
pub struct MismatchNotifier<T> {
    transport: T,
    recipients: Vec<String>,
}

impl<T: AlertTransport> MismatchNotifier<T> {
    pub fn new(transport: T, recipients: Vec<String>) -> Self {
        Self {
            transport,
            recipients,
        }
    }
}

#[async_trait]
impl<T: AlertTransport> AlertNotifier for MismatchNotifier<T> {
    async fn notify(&self, resident_id: &str, mismatch_count: u32) -> Result<(), NotificationError> {
        let result = if self.recipients.is_empty() {
            Err(NotificationError::Config("no alert recipients configured".to_string()))
        } else {
            let message = mismatch_alert(resident_id, mismatch_count, &now_utc_iso());
            self.transport.send(&message, &self.recipients).await
        };

        match &result {
            Ok(()) => info!(
                resident = resident_id,
                recipients = self.recipients.len(),
                "alert email sent"
            ),
            Err(err) => error!(resident = resident_id, error = %err, "failed to send alert email"),
        }
        result
    }
}

// ── SMTP ────────────────────────────────────────────────────────────────────

/// Implicit-TLS SMTP submission with login credentials.
///
/// Settings are checked at send time so an incomplete `[email]` section only
/// costs the alert, not the monitor.
#[derive(Debug, Clone)]
pub struct SmtpMailer {
    config: EmailConfig,
}

impl SmtpMailer {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    fn build_message(
        &self,
        message: &AlertMessage,
        recipients: &[String],
    ) -> Result<Message, NotificationError> {
        let from: Mailbox = parse_mailbox(&self.config.sender)?;
        let mut builder = Message::builder()
            .from(from)
            .subject(message.subject.clone())
            .header(ContentType::TEXT_HTML);
        for recipient in recipients {
            builder = builder.to(parse_mailbox(recipient)?);
        }
        builder
            .body(message.html_body.clone())
            .map_err(|err| NotificationError::Build(err.to_string()))
    }
}

fn parse_mailbox(raw: &str) -> Result<Mailbox, NotificationError> {
    raw.trim()
        .parse()
        .map_err(|_| NotificationError::Address(raw.to_string()))
}

#[async_trait]
impl AlertTransport for SmtpMailer {
    async fn send(&self, message: &AlertMessage, recipients: &[String]) -> Result<(), NotificationError> {
        let cfg = &self.config;
        if cfg.sender.is_empty() || cfg.password.is_empty() || cfg.smtp_server.is_empty() {
            return Err(NotificationError::Config("SMTP configuration incomplete".to_string()));
        }
        if recipients.is_empty() {
            return Err(NotificationError::Config("no valid email recipients".to_string()));
        }

        let email = self.build_message(message, recipients)?;
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&cfg.smtp_server)
            .map_err(|err| NotificationError::Config(err.to_string()))?
            .port(cfg.smtp_port)
            .credentials(Credentials::new(cfg.sender.clone(), cfg.password.clone()))
            .build();

        mailer
            .send(email)
            .await
            .map_err(|err| NotificationError::Delivery(err.to_string()))?;
        Ok(())
    }
}
