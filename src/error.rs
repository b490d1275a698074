use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("bad request: {0}")]
    Validation(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("not found")]
    NotFound,
    #[error("conflict: {0}")]
    StateConflict(String),
    #[error("rate limited")]
    RateLimited { retry_after_secs: u64, remaining: i64 },
    #[error("service not configured: {0}")]
    Configuration(String),
    #[error("upstream failure: {0}")]
    Upstream(String),
    #[error("{0}")]
    Message(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::StateConflict(_) => StatusCode::CONFLICT,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Db(_) | AppError::Message(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(?self);
        }
        match self {
            AppError::RateLimited {
                retry_after_secs,
                remaining,
            } => (
                status,
                [(header::RETRY_AFTER, retry_after_secs.to_string())],
                axum::Json(serde_json::json!({
                    "error": "rate limited",
                    "remaining": remaining,
                    "retryAfterSeconds": retry_after_secs,
                })),
            )
                .into_response(),
            // Configuration details stay in the server log; callers get a generic line.
            AppError::Configuration(_) => {
                (status, "service not configured".to_string()).into_response()
            }
            other => (status, other.to_string()).into_response(),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
