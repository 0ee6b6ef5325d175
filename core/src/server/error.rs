use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use log::warn;
use serde_json::json;

use crate::error::SourceError;

/// JSON error body returned by every API route.
#[derive(Debug)]
pub struct ApiError {
    pub message: String,
    pub status_code: StatusCode,
    pub error_code: Option<String>,
}

impl ApiError {
    pub fn new(status_code: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code,
            error_code: Some(code.to_string()),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "CONFLICT", message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ApiError {}

/// HTTP status that mirrors an upstream failure.
pub fn status_for(err: &SourceError) -> StatusCode {
    match err {
        SourceError::InvalidTarget(_) => StatusCode::BAD_REQUEST,
        SourceError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        SourceError::NotFound { .. } => StatusCode::NOT_FOUND,
        SourceError::Upstream { status, .. } if (400..500).contains(status) => {
            StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
        }
        SourceError::Timeout { .. } | SourceError::PollTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        SourceError::NotConfigured(_) | SourceError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        SourceError::Unauthorized { .. }
        | SourceError::Upstream { .. }
        | SourceError::JobFailed { .. }
        | SourceError::Decode { .. }
        | SourceError::Transport { .. } => StatusCode::BAD_GATEWAY,
    }
}

fn error_code(err: &SourceError) -> &'static str {
    match err {
        SourceError::InvalidTarget(_) => "INVALID_TARGET",
        SourceError::NotConfigured(_) => "NOT_CONFIGURED",
        SourceError::Unauthorized { .. } => "UPSTREAM_UNAUTHORIZED",
        SourceError::NotFound { .. } => "NOT_FOUND",
        SourceError::RateLimited { .. } => "RATE_LIMITED",
        SourceError::Upstream { .. } => "UPSTREAM_ERROR",
        SourceError::Timeout { .. } => "UPSTREAM_TIMEOUT",
        SourceError::Transport { .. } => "UPSTREAM_UNREACHABLE",
        SourceError::Decode { .. } => "UPSTREAM_DECODE",
        SourceError::JobFailed { .. } => "JOB_FAILED",
        SourceError::PollTimeout { .. } => "POLL_TIMEOUT",
        SourceError::Cancelled => "CANCELLED",
    }
}

impl From<SourceError> for ApiError {
    fn from(err: SourceError) -> Self {
        Self::new(status_for(&err), error_code(&err), err.to_string())
    }
}

impl From<&SourceError> for ApiError {
    fn from(err: &SourceError) -> Self {
        Self::from(err.clone())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status_code.is_server_error() {
            warn!("API error {}: {}", self.status_code.as_u16(), self.message);
        }

        let mut body = json!({
            "error": true,
            "message": self.message,
            "status": self.status_code.as_u16()
        });
        if let Some(code) = self.error_code {
            body["error_code"] = json!(code);
        }

        (self.status_code, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
