//! Session-based authentication gate.
//!
//! Credentials are bcrypt-hashed at signup and verified at login; a
//! successful login issues an opaque uuid token stored in the sessions
//! table. `AuthUser` is the axum extractor that gates protected handlers.

use axum::http::{HeaderMap, header, request::Parts};
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::api::{ApiError, SharedState};
use crate::errors::AuthError;
use crate::models::User;

/// Sessions live for 30 days; expired rows resolve to no user.
pub const SESSION_TTL_DAYS: i64 = 30;

pub fn hash_password(password: &str) -> Result<String, AuthError> {
    Ok(bcrypt::hash(password, bcrypt::DEFAULT_COST)?)
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
    Ok(bcrypt::verify(password, hash)?)
}

pub fn new_session_token() -> String {
    Uuid::new_v4().to_string()
}

pub fn session_expiry(now: DateTime<Utc>) -> DateTime<Utc> {
    now + Duration::days(SESSION_TTL_DAYS)
}

/// Pull the opaque session token out of an `Authorization: Bearer` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_string)
}

/// Extractor for handlers that require an authenticated session.
/// Rejects with 401 when the token is missing, unknown, or expired.
pub struct AuthUser(pub User);

impl axum::extract::FromRequestParts<SharedState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| ApiError::Unauthorized("Unauthorized".to_string()))?;
        let now = Utc::now();
        let user = state
            .db
            .call(move |db| db.get_session_user(&token, now))
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?
            .ok_or_else(|| ApiError::Unauthorized(AuthError::InvalidSession.to_string()))?;
        Ok(AuthUser(user))
    }
}
