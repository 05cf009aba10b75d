// SPDX-License-Identifier: MIT

//! Application error types with consistent API responses.
//!
//! The taxonomy mirrors how sync failures need to be handled:
//! - `ReauthRequired` suspends a connection until the user reconnects
//! - `Transient` is retryable on the next scheduled sync, watermark untouched
//! - `Upstream` carries provider HTTP diagnostics (status + truncated body)
//!
//! Access tokens, refresh tokens and shared secrets must never appear in
//! error messages or log output.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Maximum upstream body length carried in diagnostics.
pub const UPSTREAM_BODY_LIMIT: usize = 256;

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Missing configuration: {0}")]
    Config(&'static str),

    #[error("No {0} connection for this user")]
    NotConnected(String),

    #[error("Connection requires reauthorization")]
    ReauthRequired,

    #[error("Sync is disabled for this connection")]
    SyncDisabled,

    #[error("A sync is already in progress for this connection")]
    SyncInProgress,

    #[error("Provider returned HTTP {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("Transient provider failure: {0}")]
    Transient(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Build an `Upstream` error, truncating the body for diagnostics.
    pub fn upstream(status: u16, body: &str) -> Self {
        let mut body = body.to_string();
        if body.len() > UPSTREAM_BODY_LIMIT {
            let mut cut = UPSTREAM_BODY_LIMIT;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        AppError::Upstream {
            status,
            body,
        }
    }

    /// True for errors where retrying later (without user action) makes sense.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::Transient(_)
                | AppError::Upstream {
                    status: 500..=599,
                    ..
                }
        )
    }

    /// True when the provider rejected our credentials.
    pub fn is_auth_rejection(&self) -> bool {
        matches!(
            self,
            AppError::ReauthRequired
                | AppError::Upstream {
                    status: 401 | 403,
                    ..
                }
        )
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err.to_string())
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", None),
            AppError::InvalidToken => (StatusCode::UNAUTHORIZED, "invalid_token", None),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", Some(msg.clone())),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", Some(msg.clone()))
            }
            AppError::Config(name) => {
                tracing::error!(name, "Missing configuration");
                (StatusCode::INTERNAL_SERVER_ERROR, "config_error", None)
            }
            AppError::NotConnected(provider) => (
                StatusCode::NOT_FOUND,
                "not_connected",
                Some(format!("no {} connection", provider)),
            ),
            AppError::ReauthRequired => (
                StatusCode::UNAUTHORIZED,
                "reauthorization_required",
                Some("reconnect the provider to resume syncing".to_string()),
            ),
            AppError::SyncDisabled => (StatusCode::CONFLICT, "sync_disabled", None),
            AppError::SyncInProgress => (StatusCode::CONFLICT, "sync_in_progress", None),
            AppError::Upstream { status, body } => (
                StatusCode::BAD_GATEWAY,
                "provider_error",
                Some(format!("HTTP {}: {}", status, body)),
            ),
            AppError::Transient(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "provider_unavailable",
                Some(msg.clone()),
            ),
            AppError::Database(msg) => {
                tracing::error!(error = %msg, "Database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_body_is_truncated() {
        let long = "x".repeat(2048);
        match AppError::upstream(500, &long) {
            AppError::Upstream { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body.len(), UPSTREAM_BODY_LIMIT);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn transient_classification() {
        assert!(AppError::Transient("timeout".into()).is_transient());
        assert!(AppError::upstream(503, "oops").is_transient());
        assert!(!AppError::upstream(401, "nope").is_transient());
        assert!(AppError::upstream(401, "nope").is_auth_rejection());
    }
}
