//! Error types for remote API access.

use thiserror::Error;

use crate::store::StoreError;

/// Errors that can occur while talking to the remote API.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("transport error requesting {path}: {source}")]
    Transport {
        /// The request path.
        path: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout requesting {path}")]
    Timeout {
        /// The request path.
        path: String,
    },

    /// Error status from the remote API (4xx, 5xx).
    #[error("HTTP {status} requesting {path}")]
    Status {
        /// The request path.
        path: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The response body could not be decoded.
    #[error("failed to decode response from {path}: {message}")]
    Decode {
        /// The request path.
        path: String,
        /// Decoder message.
        message: String,
    },

    /// The request was malformed before it was sent (missing parameter, bad URL).
    #[error("invalid request: {reason}")]
    InvalidRequest {
        /// What was wrong with the request.
        reason: String,
    },

    /// The caller's cancellation token fired.
    #[error("request cancelled")]
    Cancelled,

    /// No access token could be obtained for a member-scoped resource.
    #[error("access token unavailable for member {member_id}: {message}")]
    Token {
        /// Member the token was requested for.
        member_id: i64,
        /// Token source message.
        message: String,
    },

    /// Reading or writing the validator store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl FetchError {
    /// Creates a transport error from a reqwest error, mapping timeouts to [`FetchError::Timeout`].
    pub fn transport(path: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout { path: path.into() }
        } else {
            Self::Transport {
                path: path.into(),
                source,
            }
        }
    }

    /// Creates a timeout error.
    pub fn timeout(path: impl Into<String>) -> Self {
        Self::Timeout { path: path.into() }
    }

    /// Creates an HTTP status error.
    pub fn status(path: impl Into<String>, status: u16) -> Self {
        Self::Status {
            path: path.into(),
            status,
        }
    }

    /// Creates a decode error.
    pub fn decode(path: impl Into<String>, message: impl ToString) -> Self {
        Self::Decode {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Creates an invalid request error.
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    /// Creates a token error.
    pub fn token(member_id: i64, message: impl Into<String>) -> Self {
        Self::Token {
            member_id,
            message: message.into(),
        }
    }

    /// Returns the HTTP status carried by a [`FetchError::Status`].
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True when the error came from the caller's cancellation token.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_status_display() {
        let error = FetchError::status("/characters/1/assets/", 404);
        let msg = error.to_string();
        assert!(msg.contains("404"), "Expected '404' in: {msg}");
        assert!(msg.contains("/characters/1/assets/"), "Expected path in: {msg}");
        assert_eq!(error.status_code(), Some(404));
    }

    #[test]
    fn test_fetch_error_timeout_display() {
        let error = FetchError::timeout("/universe/regions/");
        assert!(error.to_string().contains("timeout"));
        assert_eq!(error.status_code(), None);
    }

    #[test]
    fn test_fetch_error_invalid_request_display() {
        let error = FetchError::invalid_request("member id required for assets");
        assert!(error.to_string().contains("member id required"));
    }

    #[test]
    fn test_fetch_error_store_conversion() {
        let error: FetchError = StoreError::not_found("cache_validator", "assets:1:-").into();
        assert!(matches!(error, FetchError::Store(_)));
    }

    #[test]
    fn test_fetch_error_cancelled() {
        assert!(FetchError::Cancelled.is_cancelled());
        assert!(!FetchError::timeout("/x").is_cancelled());
    }
}
