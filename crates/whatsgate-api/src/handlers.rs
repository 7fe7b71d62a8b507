//! API request handlers

pub mod accounts;
pub mod campaigns;
pub mod contacts;
pub mod health;
pub mod keywords;
pub mod messages;
pub mod metrics;
pub mod recipient_lists;
pub mod templates;
pub mod webhook;
pub mod webhook_logs;

use axum::{http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use whatsgate_common::Error;

use crate::auth::{require_scope, AuthContext};

pub use health::*;

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    /// Milliseconds until the limiter or breaker admits calls again
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    /// Id of the stored failed message, when the send reached the remote API
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<uuid::Uuid>,
}

/// Handler error type
pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// Handler result type
pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl ErrorResponse {
    pub fn new(error: &str, message: impl Into<String>) -> Self {
        Self {
            error: error.to_string(),
            message: message.into(),
            retry_after_ms: None,
            message_id: None,
        }
    }
}

/// Map a service error onto its HTTP status and body
pub fn api_error(e: Error) -> ApiError {
    let status = StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let message = if status.is_server_error() && !matches!(e, Error::CircuitOpen { .. } | Error::RemoteApi { .. }) {
        error!("Request failed: {}", e);
        "Internal server error".to_string()
    } else {
        warn!("Request rejected: {}", e);
        e.to_string()
    };

    let retry_after_ms = match &e {
        Error::RateLimitExceeded { retry_after_ms, .. } | Error::CircuitOpen { retry_after_ms, .. } => {
            Some(*retry_after_ms)
        }
        _ => None,
    };

    (
        status,
        Json(ErrorResponse {
            retry_after_ms,
            ..ErrorResponse::new(e.code(), message)
        }),
    )
}

/// Scope check producing a JSON error body
pub fn scope(auth: &AuthContext, scope: &str) -> ApiResult<()> {
    require_scope(auth, scope).map_err(|status| {
        (
            status,
            Json(ErrorResponse::new(
                "FORBIDDEN",
                format!("API key lacks the '{}' scope", scope),
            )),
        )
    })
}

/// 404 for a missing record
pub fn not_found(what: &str) -> ApiError {
    api_error(Error::NotFound(what.to_string()))
}
