//! Error types for the client library.

use serde::Deserialize;
use thiserror::Error;

/// Error body produced by the remote API for rejected requests.
///
/// The remote side wraps failures as `{"detail": "..."}`.
#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable failure reason.
    pub detail: String,
}

impl ErrorResponse {
    /// Extracts the failure reason from a response body.
    ///
    /// Prefers the structured `detail` field, then the raw body text, then
    /// `fallback` when the body is empty.
    #[must_use]
    pub fn reason(body: &str, fallback: &str) -> String {
        if let Ok(parsed) = serde_json::from_str::<Self>(body) {
            return parsed.detail;
        }
        let trimmed = body.trim();
        if trimmed.is_empty() {
            fallback.to_string()
        } else {
            trimmed.to_string()
        }
    }
}

/// Errors that can occur when talking to the assistant API.
///
/// Malformed records inside a stream are not errors: they are skipped by the
/// ingester. Everything here is a transport-level failure of the request itself.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ClientError {
    /// Network or HTTP request failure, including a broken stream mid-read.
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// Middleware layer error (retry policy).
    #[error("Middleware error: {0}")]
    MiddlewareError(#[from] reqwest_middleware::Error),

    /// JSON serialization or deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// The API rejected the credentials (HTTP 401/403).
    #[error("Authentication error: {0}")]
    AuthenticationError(String),

    /// The API answered with a non-success status.
    ///
    /// `reason` is the response body text, surfaced as the failure reason.
    #[error("Request failed with status {status}: {reason}")]
    RequestFailed {
        /// HTTP status code.
        status: u16,
        /// Failure reason taken from the response body.
        reason: String,
    },

    /// Client configuration issue (invalid base URL, bad settings).
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// The API returned data that doesn't match the expected format.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ClientError {
    /// Check if this error is potentially retryable.
    ///
    /// Returns `true` for network errors, rate limits and server-side failures.
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::NetworkError(_) | Self::MiddlewareError(_) => true,
            Self::RequestFailed { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Check if this is an authentication error.
    pub const fn is_authentication_error(&self) -> bool {
        matches!(self, Self::AuthenticationError(_))
    }

    /// HTTP status of a rejected request, if that is what this error is.
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::RequestFailed { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Builds the error for a non-success response.
    pub(crate) fn from_status(status: reqwest::StatusCode, body: &str, fallback: &str) -> Self {
        let reason = ErrorResponse::reason(body, fallback);
        match status.as_u16() {
            401 | 403 => Self::AuthenticationError(reason),
            code => Self::RequestFailed {
                status: code,
                reason,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_prefers_detail() {
        let reason = ErrorResponse::reason(r#"{"detail": "Request timed out"}"#, "fallback");
        assert_eq!(reason, "Request timed out");
    }

    #[test]
    fn test_reason_falls_back_to_raw_text_then_default() {
        assert_eq!(ErrorResponse::reason("Bad Gateway", "fallback"), "Bad Gateway");
        assert_eq!(ErrorResponse::reason("  ", "fallback"), "fallback");
    }

    #[test]
    fn test_status_mapping() {
        let auth = ClientError::from_status(reqwest::StatusCode::UNAUTHORIZED, "", "nope");
        assert!(auth.is_authentication_error());

        let server = ClientError::from_status(
            reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            r#"{"detail": "boom"}"#,
            "nope",
        );
        assert_eq!(server.status(), Some(500));
        assert!(server.is_retryable());
        assert_eq!(
            server.to_string(),
            "Request failed with status 500: boom"
        );

        let rejected = ClientError::from_status(reqwest::StatusCode::BAD_REQUEST, "", "nope");
        assert!(!rejected.is_retryable());
    }
}
