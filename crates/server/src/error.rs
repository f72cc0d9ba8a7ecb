//! API error types.

use crate::upstream::UpstreamError;
use axum::Json;
use axum::http::header::WWW_AUTHENTICATE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tarn_storage::StorageError;

/// Challenge sent with 401 responses on npm endpoints.
pub const NPM_AUTH_CHALLENGE: &str = "Bearer realm=\"npm\"";

/// npm-style error body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Canonical reason phrase of the status code.
    pub error: String,
    /// Human-readable explanation.
    pub reason: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    /// 401 without a challenge (e.g. failed login).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// 401 carrying `WWW-Authenticate: Bearer realm="npm"`.
    #[error("authentication required: {0}")]
    AuthRequired(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("upstream request timed out: {0}")]
    Timeout(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("core error: {0}")]
    Core(#[from] tarn_core::Error),
}

impl ApiError {
    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) | Self::AuthRequired(_) => StatusCode::UNAUTHORIZED,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            Self::Internal(_) | Self::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Storage(e) => match e {
                StorageError::NotFound(_) => StatusCode::NOT_FOUND,
                StorageError::InvalidKey(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Core(e) => match e {
                tarn_core::Error::VersionExists(_) => StatusCode::CONFLICT,
                tarn_core::Error::InvalidToken(_) => StatusCode::UNAUTHORIZED,
                tarn_core::Error::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
                _ => StatusCode::BAD_REQUEST,
            },
        }
    }

    /// Message safe to return to the client.
    fn client_reason(&self, status: StatusCode) -> String {
        if status.is_server_error() {
            return "internal server error".to_string();
        }
        match self {
            Self::NotFound(m)
            | Self::BadRequest(m)
            | Self::Unauthorized(m)
            | Self::AuthRequired(m)
            | Self::Conflict(m)
            | Self::PayloadTooLarge(m)
            | Self::Timeout(m) => m.clone(),
            Self::Core(e) => e.to_string(),
            Self::Storage(e) => e.to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "request rejected");
        }

        let body = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            reason: self.client_reason(status),
        };
        let mut response = (status, Json(body)).into_response();
        if matches!(self, Self::AuthRequired(_)) {
            response
                .headers_mut()
                .insert(WWW_AUTHENTICATE, HeaderValue::from_static(NPM_AUTH_CHALLENGE));
        }
        response
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
