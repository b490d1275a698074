use std::sync::Arc;

use axum::{extract::Extension, Json};
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::extractor::{CallerIp, InternalTool};
use crate::ratelimit::{EndpointClass, RateLimiter};
use crate::tokens;

#[derive(Debug, Deserialize)]
pub struct InternalLoginRequest {
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

/// Password exchange for an internal-tool session token.
pub async fn internal_login(
    Extension(config): Extension<Arc<AppConfig>>,
    Extension(limiter): Extension<RateLimiter>,
    CallerIp(ip): CallerIp,
    Json(payload): Json<InternalLoginRequest>,
) -> AppResult<Json<TokenResponse>> {
    limiter.check(EndpointClass::Auth, &ip).await?;

    let Some(expected) = config.internal_tool_password.as_deref() else {
        return Err(AppError::Configuration(
            "internal tool password not configured".into(),
        ));
    };
    if !tokens::password_matches(&payload.password, expected) {
        return Err(AppError::Unauthorized);
    }

    let token = tokens::issue_tool_session(&config)?;
    Ok(Json(TokenResponse { token }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewTokenRequest {
    pub portal_key: String,
}

/// Issues a portal-preview token scoped to a single portal. Requires an
/// internal-tool session; the issued token cannot submit changes.
pub async fn issue_preview_token(
    Extension(config): Extension<Arc<AppConfig>>,
    Extension(limiter): Extension<RateLimiter>,
    _tool: InternalTool,
    CallerIp(ip): CallerIp,
    Json(payload): Json<PreviewTokenRequest>,
) -> AppResult<Json<TokenResponse>> {
    limiter.check(EndpointClass::General, &ip).await?;

    let portal_key = payload.portal_key.trim();
    if portal_key.is_empty() {
        return Err(AppError::Validation("portalKey is required".into()));
    }
    let token = tokens::issue_preview_token(&config, portal_key)?;
    Ok(Json(TokenResponse { token }))
}
