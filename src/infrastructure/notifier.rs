use crate::domain::ports::{Notification, Notifier};
use crate::error::{CommerceError, Result};
use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

/// Writes admin notifications to the log instead of sending mail.
pub struct LogNotifier {
    recipient: Option<String>,
}

impl LogNotifier {
    pub fn new(recipient: Option<String>) -> Self {
        Self { recipient }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        match &self.recipient {
            Some(to) => tracing::info!(
                to = %to,
                subject = %notification.subject,
                "{}",
                notification.body
            ),
            None => tracing::info!(
                subject = %notification.subject,
                "Notification without recipient: {}",
                notification.body
            ),
        }
        Ok(())
    }
}

pub const DEFAULT_SMTP_PORT: u16 = 587;

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
    /// Admin mailbox every notification goes to.
    pub to: String,
    pub starttls: bool,
}

/// Mails admin notifications as plain text over SMTP.
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl SmtpNotifier {
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        let from = mailbox("SMTP_FROM", &config.from)?;
        let to = mailbox("NOTIFY_EMAIL", &config.to)?;
        let builder = if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
        }
        .map_err(|e| CommerceError::ConfigError(format!("SMTP_HOST: {}", e)))?;

        let mut builder = builder.port(config.port);
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }
        Ok(Self {
            transport: builder.build(),
            from,
            to,
        })
    }

    fn message(&self, notification: &Notification) -> Result<Message> {
        Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(notification.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(notification.body.clone())
            .map_err(|e| CommerceError::InternalError(Box::new(e)))
    }
}

fn mailbox(key: &str, raw: &str) -> Result<Mailbox> {
    raw.parse()
        .map_err(|e| CommerceError::ConfigError(format!("{}: {}", key, e)))
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        let message = self.message(notification)?;
        self.transport
            .send(message)
            .await
            .map_err(|e| CommerceError::InternalError(Box::new(e)))?;
        tracing::debug!(to = %self.to, subject = %notification.subject, "Notification mailed");
        Ok(())
    }
}
