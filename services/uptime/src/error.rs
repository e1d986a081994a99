//! Error types for the uptime service

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Errors that can occur in the uptime service
#[derive(Debug, thiserror::Error)]
pub enum UptimeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Probe failed: {0}")]
    Probe(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("SMTP error: {0}")]
    Smtp(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    /// Rendered verbatim so the body names the token problem
    #[error("{0}")]
    Auth(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Rate limit exceeded, retry later")]
    RateLimited,

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl UptimeError {
    /// HTTP status the API answers with for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            UptimeError::Auth(_) => StatusCode::UNAUTHORIZED,
            UptimeError::Forbidden(_) => StatusCode::FORBIDDEN,
            UptimeError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            UptimeError::Validation(_) | UptimeError::Json(_) => StatusCode::BAD_REQUEST,
            UptimeError::Conflict(_) => StatusCode::CONFLICT,
            UptimeError::NotFound(_) => StatusCode::NOT_FOUND,
            UptimeError::Delivery(_) | UptimeError::Smtp(_) | UptimeError::Http(_) => {
                StatusCode::BAD_GATEWAY
            }
            UptimeError::Config(_) | UptimeError::Probe(_) | UptimeError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for UptimeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = axum::Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

/// Result type alias for uptime operations
pub type Result<T> = std::result::Result<T, UptimeError>;
