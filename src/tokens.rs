use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};

pub const TOKEN_ISSUER: &str = "leadgen-backend";
pub const TOOL_AUDIENCE: &str = "internal-tools";
pub const SCOPE_PORTAL_PREVIEW: &str = "internal_portal_preview";
pub const SCOPE_PORTAL_SESSION: &str = "portal_session";

const TOOL_SESSION_HOURS: i64 = 8;
const PREVIEW_HOURS: i64 = 24;

/// Internal-tool session token claims.
#[derive(Debug, Serialize, Deserialize)]
struct ToolSessionClaims {
    authorized: bool,
    iss: String,
    aud: String,
    exp: usize,
}

/// Claims shared by the portal-scoped token kinds (preview and session).
/// The `scope` field is what keeps the kinds non-interchangeable.
#[derive(Debug, Serialize, Deserialize)]
struct PortalScopedClaims {
    scope: String,
    portal_key: String,
    iss: String,
    exp: usize,
}

fn expiry(hours: i64) -> AppResult<usize> {
    Utc::now()
        .checked_add_signed(Duration::hours(hours))
        .map(|t| t.timestamp() as usize)
        .ok_or_else(|| AppError::Message("token expiry overflow".into()))
}

pub fn issue_tool_session(config: &AppConfig) -> AppResult<String> {
    let claims = ToolSessionClaims {
        authorized: true,
        iss: TOKEN_ISSUER.to_string(),
        aud: TOOL_AUDIENCE.to_string(),
        exp: expiry(TOOL_SESSION_HOURS)?,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.internal_token_secret.as_bytes()),
    )
    .map_err(|e| {
        tracing::error!(?e, "failed to sign tool-session token");
        AppError::Message("token signing failed".into())
    })
}

/// Fails closed: any decode error, expiry, or claim mismatch is `false`.
pub fn verify_tool_session(config: &AppConfig, token: &str) -> bool {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[TOKEN_ISSUER]);
    validation.set_audience(&[TOOL_AUDIENCE]);
    match decode::<ToolSessionClaims>(
        token,
        &DecodingKey::from_secret(config.internal_token_secret.as_bytes()),
        &validation,
    ) {
        Ok(data) => data.claims.authorized,
        Err(_) => false,
    }
}

pub fn issue_preview_token(config: &AppConfig, portal_key: &str) -> AppResult<String> {
    issue_portal_scoped(config, SCOPE_PORTAL_PREVIEW, portal_key, PREVIEW_HOURS)
}

/// Returns the portal key the preview token is scoped to, or `None`.
pub fn verify_preview_token(config: &AppConfig, token: &str) -> Option<String> {
    verify_portal_scoped(config, SCOPE_PORTAL_PREVIEW, token)
}

pub fn issue_portal_session(config: &AppConfig, portal_key: &str) -> AppResult<String> {
    issue_portal_scoped(config, SCOPE_PORTAL_SESSION, portal_key, PREVIEW_HOURS)
}

/// Returns the portal key of an authenticated portal session, or `None`.
pub fn verify_portal_session(config: &AppConfig, token: &str) -> Option<String> {
    verify_portal_scoped(config, SCOPE_PORTAL_SESSION, token)
}

fn issue_portal_scoped(
    config: &AppConfig,
    scope: &str,
    portal_key: &str,
    hours: i64,
) -> AppResult<String> {
    let claims = PortalScopedClaims {
        scope: scope.to_string(),
        portal_key: portal_key.to_string(),
        iss: TOKEN_ISSUER.to_string(),
        exp: expiry(hours)?,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.internal_token_secret.as_bytes()),
    )
    .map_err(|e| {
        tracing::error!(?e, scope, "failed to sign portal-scoped token");
        AppError::Message("token signing failed".into())
    })
}

fn verify_portal_scoped(config: &AppConfig, scope: &str, token: &str) -> Option<String> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[TOKEN_ISSUER]);
    let data = decode::<PortalScopedClaims>(
        token,
        &DecodingKey::from_secret(config.internal_token_secret.as_bytes()),
        &validation,
    )
    .ok()?;
    if data.claims.scope != scope {
        return None;
    }
    Some(data.claims.portal_key)
}

/// Hash-then-compare so the comparison does not leak prefix length timing.
pub fn password_matches(supplied: &str, expected: &str) -> bool {
    let supplied_digest = Sha256::digest(supplied.as_bytes());
    let expected_digest = Sha256::digest(expected.as_bytes());
    supplied_digest == expected_digest
}
