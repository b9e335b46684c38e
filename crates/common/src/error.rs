use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Errors surfaced by the registry, the trigger path and the HTTP layer.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A remote registry or push service answered badly or not at all.
    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable code included in error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Database(_) => "database",
            AppError::Redis(_) => "redis",
            AppError::Upstream(_) => "upstream",
            AppError::Auth(_) => "unauthorized",
            AppError::Validation(_) => "invalid_request",
            AppError::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Database(_) | AppError::Redis(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Storage details stay in the logs.
        let message = if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "Request failed");
            match &self {
                AppError::Upstream(msg) => msg.clone(),
                _ => "Internal server error".to_string(),
            }
        } else {
            match &self {
                AppError::Auth(msg) | AppError::Validation(msg) => msg.clone(),
                other => other.to_string(),
            }
        };

        let body = json!({ "error": message, "code": self.code() });
        (status, Json(body)).into_response()
    }
}
