//! Outbound notification sink.
//!
//! Delivery is best-effort and fire-and-forget: a failed send is the
//! caller's problem to log, never to escalate. The `Mailer` trait is the
//! seam the reminder sweep dispatches through, so tests can substitute a
//! recording implementation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::MailConfig;

#[async_trait]
pub trait Mailer: Send + Sync {
    /// Attempt delivery of one HTML message. Failure is non-fatal to the
    /// caller; there is no retry queue.
    async fn send(&self, to: &str, subject: &str, body_html: &str) -> Result<()>;
}

/// SMTP sink over a STARTTLS relay (port 587 in the default deployment).
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &MailConfig) -> Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .with_context(|| format!("Invalid SMTP relay host: {}", config.host))?
            .port(config.port)
            .credentials(Credentials::new(config.user.clone(), config.pass.clone()))
            .build();
        let from: Mailbox = config
            .sender()
            .parse()
            .with_context(|| format!("Invalid sender mailbox: {}", config.sender()))?;
        Ok(Self { transport, from })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, body_html: &str) -> Result<()> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(to
                .parse()
                .with_context(|| format!("Invalid recipient address: {}", to))?)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(body_html.to_string())
            .context("Failed to build message")?;
        self.transport
            .send(message)
            .await
            .with_context(|| format!("SMTP delivery to {} failed", to))?;
        Ok(())
    }
}

/// Stand-in sink used when SMTP is not configured. Every send fails, which
/// flows through the sweep's normal per-item failure path, so the rest of
/// the application stays usable.
pub struct DisabledMailer;

#[async_trait]
impl Mailer for DisabledMailer {
    async fn send(&self, to: &str, _subject: &str, _body_html: &str) -> Result<()> {
        anyhow::bail!("SMTP transport not configured; dropping mail to {}", to)
    }
}

// ── Reminder message synthesis ─────────────────────────────────────────

pub fn reminder_subject(title: &str) -> String {
    format!("Reminder: Task \"{}\" is approaching its due date!", title)
}

/// HTML reminder body. Greets the assignee by display name when one exists,
/// otherwise generically; the deadline is rendered as a plain date.
pub fn reminder_body(
    assignee_name: Option<&str>,
    title: &str,
    deadline: &DateTime<Utc>,
) -> String {
    let name = assignee_name.unwrap_or("there");
    format!(
        "<p>Hi {},</p>\n<p>The task <strong>{}</strong> is due on <strong>{}</strong>. \
         Please ensure it is completed on time.</p>",
        name,
        title,
        deadline.format("%m/%d/%Y")
    )
}
