//! Mail transport configuration, read from the environment.
//!
//! SMTP credentials are deployment secrets and never live in the repo; they
//! come from the process environment (a local `.env` is loaded in `main`).

use anyhow::{Context, Result};

pub const DEFAULT_SMTP_PORT: u16 = 587;

#[derive(Debug, Clone)]
pub struct MailConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
}

impl MailConfig {
    /// Read SMTP settings from `SMTP_HOST`, `SMTP_PORT` (default 587),
    /// `SMTP_USER`, and `SMTP_PASS`.
    pub fn from_env() -> Result<Self> {
        let host = std::env::var("SMTP_HOST").context("SMTP_HOST is not set")?;
        let port = match std::env::var("SMTP_PORT") {
            Ok(raw) => raw
                .parse::<u16>()
                .with_context(|| format!("Invalid SMTP_PORT: {}", raw))?,
            Err(_) => DEFAULT_SMTP_PORT,
        };
        let user = std::env::var("SMTP_USER").context("SMTP_USER is not set")?;
        let pass = std::env::var("SMTP_PASS").context("SMTP_PASS is not set")?;
        Ok(Self {
            host,
            port,
            user,
            pass,
        })
    }

    /// Sender identity interpolated as the "from" address.
    pub fn sender(&self) -> String {
        format!("\"Taskify App\" <{}>", self.user)
    }
}
