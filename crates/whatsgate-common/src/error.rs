//! Error types for WhatsGate

use thiserror::Error;
use uuid::Uuid;

/// Meta error codes that signal throttling or a temporary outage.
const TRANSIENT_REMOTE_CODES: &[i64] = &[1, 2, 4, 80007, 130429, 131000, 131016, 131048, 131056];

/// Main error type for WhatsGate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rate limit exceeded for account {account_id} (retry after {retry_after_ms} ms)")]
    RateLimitExceeded { account_id: Uuid, retry_after_ms: u64 },

    #[error("Circuit open for account {account_id} (retry after {retry_after_ms} ms)")]
    CircuitOpen { account_id: Uuid, retry_after_ms: u64 },

    #[error("Remote API error{}: {message}", fmt_code(.code))]
    RemoteApi {
        /// HTTP status, `None` for transport failures and timeouts
        status: Option<u16>,
        /// Error code reported by the Cloud API
        code: Option<i64>,
        message: String,
    },

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for WhatsGate
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Build a remote API error from a transport failure
    pub fn transport(message: impl Into<String>) -> Self {
        Error::RemoteApi {
            status: None,
            code: None,
            message: message.into(),
        }
    }

    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Config(_) => 500,
            Error::Database(_) => 500,
            Error::Validation(_) => 422,
            Error::NotFound(_) => 404,
            Error::PermissionDenied(_) => 403,
            Error::Conflict(_) => 409,
            Error::RateLimitExceeded { .. } => 429,
            Error::CircuitOpen { .. } => 503,
            Error::RemoteApi { .. } => 502,
            Error::Auth(_) => 401,
            Error::MalformedPayload(_) => 400,
            Error::Internal(_) => 500,
            Error::Other(_) => 500,
        }
    }

    /// Returns the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "CONFIG_ERROR",
            Error::Database(_) => "DATABASE_ERROR",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::NotFound(_) => "NOT_FOUND",
            Error::PermissionDenied(_) => "FORBIDDEN",
            Error::Conflict(_) => "CONFLICT",
            Error::RateLimitExceeded { .. } => "RATE_LIMITED",
            Error::CircuitOpen { .. } => "CIRCUIT_OPEN",
            Error::RemoteApi { .. } => "REMOTE_API_ERROR",
            Error::Auth(_) => "UNAUTHORIZED",
            Error::MalformedPayload(_) => "MALFORMED_PAYLOAD",
            Error::Internal(_) => "INTERNAL_ERROR",
            Error::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether a later retry of the same call may succeed.
    ///
    /// Rate limiting and open circuits always qualify. Remote failures
    /// qualify when they never reached the API (timeouts, connection
    /// errors), when the API answered 5xx, or when Meta reports throttling.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::RateLimitExceeded { .. } | Error::CircuitOpen { .. } => true,
            Error::RemoteApi { status, code, .. } => {
                status.is_none()
                    || status.map(|s| s >= 500 || s == 429).unwrap_or(false)
                    || code.map(|c| TRANSIENT_REMOTE_CODES.contains(&c)).unwrap_or(false)
            }
            _ => false,
        }
    }
}

fn fmt_code(code: &Option<i64>) -> String {
    code.map(|c| format!(" {}", c)).unwrap_or_default()
}
