use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

/// Errors raised by the live data-binding core.
#[derive(Debug, thiserror::Error)]
pub enum LiveError {
    /// The postponed request expired or never existed.
    #[error("postponed request not found: {0}")]
    PostponedNotFound(String),
    #[error("session not found: {0}")]
    SessionNotFound(String),
}

/// Structured API error returned to clients.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiErrorBody {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
}

/// Application-level error type that converts into an HTTP response.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "BAD_REQUEST".to_string(),
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "NOT_FOUND".to_string(),
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: ApiErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<LiveError> for ApiError {
    fn from(err: LiveError) -> Self {
        tracing::debug!(%err, "live lookup failed");
        match err {
            LiveError::PostponedNotFound(_) => Self::not_found("Postponed request not found"),
            LiveError::SessionNotFound(_) => Self::not_found("Session not found"),
        }
    }
}
