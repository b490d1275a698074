use std::sync::Arc;

use axum::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use base64::Engine;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::tokens;

fn config_from_parts(parts: &Parts) -> Result<Arc<AppConfig>, AppError> {
    parts
        .extensions
        .get::<Arc<AppConfig>>()
        .cloned()
        .ok_or_else(|| AppError::Message("AppConfig extension missing".into()))
}

fn bearer_token(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|s| s.trim().to_string())
}

fn basic_credentials(parts: &Parts) -> Option<(String, String)> {
    let raw = parts
        .headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Basic ")?
        .trim()
        .to_string();
    let decoded = base64::engine::general_purpose::STANDARD.decode(raw).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

/// Authenticated client-portal session. Only a `portal_session`-scoped token
/// is accepted here; preview tokens are read-only and deliberately rejected.
#[derive(Debug)]
pub struct PortalSession {
    pub portal_key: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for PortalSession
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let config = config_from_parts(parts)?;
        let token = bearer_token(parts).ok_or(AppError::Unauthorized)?;
        if let Some(portal_key) = tokens::verify_portal_session(&config, &token) {
            return Ok(PortalSession { portal_key });
        }
        // Validly signed but wrong kind is a scope problem, not a bad credential.
        if tokens::verify_preview_token(&config, &token).is_some()
            || tokens::verify_tool_session(&config, &token)
        {
            return Err(AppError::Forbidden);
        }
        Err(AppError::Unauthorized)
    }
}

/// Operator credential: an internal-tool bearer token or, depending on the
/// deployment, Basic credentials from process configuration.
#[derive(Debug)]
pub struct OperatorAuth {
    pub operator: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for OperatorAuth
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let config = config_from_parts(parts)?;
        if let Some(token) = bearer_token(parts) {
            if tokens::verify_tool_session(&config, &token) {
                return Ok(OperatorAuth {
                    operator: "internal-tool".to_string(),
                });
            }
            if tokens::verify_preview_token(&config, &token).is_some()
                || tokens::verify_portal_session(&config, &token).is_some()
            {
                return Err(AppError::Forbidden);
            }
            return Err(AppError::Unauthorized);
        }
        if let Some((user, password)) = basic_credentials(parts) {
            let (expected_user, expected_password) = match (
                config.operator_basic_user.as_deref(),
                config.operator_basic_password.as_deref(),
            ) {
                (Some(u), Some(p)) => (u, p),
                _ => return Err(AppError::Unauthorized),
            };
            if tokens::password_matches(&user, expected_user)
                && tokens::password_matches(&password, expected_password)
            {
                return Ok(OperatorAuth { operator: user });
            }
            return Err(AppError::Unauthorized);
        }
        Err(AppError::Unauthorized)
    }
}

/// Scoped internal-tool bearer token, the only credential accepted by the
/// billing-provisioning surface.
#[derive(Debug)]
pub struct InternalTool;

#[async_trait]
impl<S> FromRequestParts<S> for InternalTool
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let config = config_from_parts(parts)?;
        let token = bearer_token(parts).ok_or(AppError::Unauthorized)?;
        if tokens::verify_tool_session(&config, &token) {
            return Ok(InternalTool);
        }
        if tokens::verify_preview_token(&config, &token).is_some()
            || tokens::verify_portal_session(&config, &token).is_some()
        {
            return Err(AppError::Forbidden);
        }
        Err(AppError::Unauthorized)
    }
}

/// Caller IP for rate limiting: first entry of `x-forwarded-for`, else an
/// "anonymous" bucket. Callers behind a shared proxy without the header are
/// bucketed together; known limitation.
pub struct CallerIp(pub String);

pub fn forwarded_for_ip(value: Option<&str>) -> String {
    value
        .and_then(|raw| raw.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
        .unwrap_or_else(|| "anonymous".to_string())
}

#[async_trait]
impl<S> FromRequestParts<S> for CallerIp
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header_value = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok());
        Ok(CallerIp(forwarded_for_ip(header_value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn test_config() -> Arc<AppConfig> {
        Arc::new(AppConfig {
            environment: crate::config::Environment::Development,
            bind_address: "127.0.0.1".into(),
            bind_port: 0,
            database_url: String::new(),
            allow_migration_failure: false,
            internal_token_secret: "0123456789abcdef0123456789abcdef".into(),
            internal_tool_password: None,
            operator_basic_user: Some("ops".into()),
            operator_basic_password: Some("swordfish-swordfish".into()),
            billing_provisioning_enabled: false,
            stripe_secret_key: None,
            stripe_api_base: String::new(),
            checkout_success_url: String::new(),
            checkout_cancel_url: String::new(),
            crm_registry_url: None,
            crm_registry_key: None,
            email_api_url: None,
            email_api_key: None,
            email_from: String::new(),
        })
    }

    fn parts_with_auth(config: Arc<AppConfig>, auth: Option<String>) -> Parts {
        let mut builder = Request::builder();
        if let Some(value) = auth {
            builder = builder.header("Authorization", value);
        }
        let request = builder.body(axum::body::Body::empty()).unwrap();
        let mut parts = request.into_parts().0;
        parts.extensions.insert(config);
        parts
    }

    #[tokio::test]
    async fn portal_session_accepted() {
        let config = test_config();
        let token = tokens::issue_portal_session(&config, "acme-roofing").unwrap();
        let mut parts = parts_with_auth(config, Some(format!("Bearer {token}")));
        let session = PortalSession::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert_eq!(session.portal_key, "acme-roofing");
    }

    #[tokio::test]
    async fn preview_token_cannot_open_portal_session() {
        let config = test_config();
        let token = tokens::issue_preview_token(&config, "acme-roofing").unwrap();
        let mut parts = parts_with_auth(config, Some(format!("Bearer {token}")));
        let err = PortalSession::from_request_parts(&mut parts, &())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden));
    }

    #[tokio::test]
    async fn operator_basic_credentials_accepted() {
        let config = test_config();
        let encoded =
            base64::engine::general_purpose::STANDARD.encode("ops:swordfish-swordfish");
        let mut parts = parts_with_auth(config, Some(format!("Basic {encoded}")));
        let auth = OperatorAuth::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert_eq!(auth.operator, "ops");
    }

    #[tokio::test]
    async fn operator_bad_password_rejected() {
        let config = test_config();
        let encoded = base64::engine::general_purpose::STANDARD.encode("ops:wrong");
        let mut parts = parts_with_auth(config, Some(format!("Basic {encoded}")));
        let err = OperatorAuth::from_request_parts(&mut parts, &())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized));
    }

    #[tokio::test]
    async fn missing_credential_rejected() {
        let config = test_config();
        let mut parts = parts_with_auth(config, None);
        let err = InternalTool::from_request_parts(&mut parts, &())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized));
    }

    #[test]
    fn forwarded_for_parsing() {
        assert_eq!(forwarded_for_ip(Some("1.2.3.4, 10.0.0.1")), "1.2.3.4");
        assert_eq!(forwarded_for_ip(Some(" 1.2.3.4 ")), "1.2.3.4");
        assert_eq!(forwarded_for_ip(Some("")), "anonymous");
        assert_eq!(forwarded_for_ip(None), "anonymous");
    }
}
