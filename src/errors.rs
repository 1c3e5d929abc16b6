//! Typed error hierarchy for Taskify.
//!
//! Two top-level enums cover the two stateful subsystems:
//! - `SweepError` — deadline reminder sweep failures
//! - `AuthError` — credential and session failures

use thiserror::Error;

/// Errors from the deadline reminder sweep.
#[derive(Debug, Error)]
pub enum SweepError {
    /// The store query for due-soon tasks failed. Aborts the current run;
    /// the next scheduled tick attempts again.
    #[error("Due-soon task query failed: {0}")]
    QueryFailed(#[source] anyhow::Error),

    #[error("Reminder sweep is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from signup, login, and session resolution.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Email {email} is already registered")]
    EmailTaken { email: String },

    #[error("Session is missing or expired")]
    InvalidSession,

    #[error("Password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
