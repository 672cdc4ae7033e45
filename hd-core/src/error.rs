//! Global error types for the Huddle client layer.
//!
//! All error categories are unified into a single `HdError` enum. The enum
//! is `Clone` (string payloads only) so a settled request outcome can be
//! shared across deduplicated callers.

use thiserror::Error;

use crate::observe::Severity;

/// Convenience type alias for Results using HdError.
pub type HdResult<T> = Result<T, HdError>;

/// Unified error type covering all error categories in the client layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HdError {
    // -- Network errors --
    /// No response was received (DNS failure, refused connection, dead link).
    #[error("network error: {0}")]
    Network(String),

    /// A request or connect deadline elapsed.
    #[error("request timeout: {0}")]
    Timeout(String),

    /// The server responded with a failure status.
    #[error("http error (status {status}): {message}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Error message extracted from the response body, or a fallback.
        message: String,
    },

    /// The request was cancelled by the caller.
    #[error("request cancelled")]
    Cancelled,

    // -- Auth errors --
    /// Token refresh failed; the session must be terminated.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// A realtime connect was attempted without a stored auth token.
    #[error("no auth token available")]
    NoToken,

    // -- Realtime errors --
    /// The realtime connection attempt did not resolve within its window.
    #[error("connection timeout: {0}")]
    ConnectionTimeout(String),

    /// Socket-level failure (emit on a dead transport, handshake error).
    #[error("socket error: {0}")]
    Socket(String),

    // -- Telemetry errors --
    /// The backend rejected a telemetry batch as malformed.
    #[error("validation error: {0}")]
    Validation(String),

    // -- Local errors --
    /// Durable storage read/write failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Failed to load or parse application configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// An unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl HdError {
    /// Whether this error is eligible for an automatic retry.
    ///
    /// Network errors, timeouts, and 5xx responses are retryable. A 429
    /// response is deliberately not, since retrying feeds the rate limiter.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) => true,
            Self::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// The HTTP status code, if this error carries one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Severity at which this error should be reported to the crash sink.
    ///
    /// `None` means the error is an expected flow and must not be reported:
    /// 404 on optional resources, 401 (handled by refresh/logout), and 429.
    pub fn report_severity(&self) -> Option<Severity> {
        match self {
            Self::Http { status, .. } => match status {
                401 | 404 | 429 => None,
                s if *s >= 500 => Some(Severity::Error),
                _ => Some(Severity::Warning),
            },
            Self::Cancelled => None,
            Self::Network(_) | Self::Timeout(_) => Some(Severity::Warning),
            Self::Auth(_) | Self::NoToken => Some(Severity::Warning),
            Self::ConnectionTimeout(_) | Self::Socket(_) => Some(Severity::Error),
            _ => Some(Severity::Error),
        }
    }

    /// A user-facing message for this error.
    ///
    /// Connectivity problems all map to the same "check your connection"
    /// message; everything else gets a generic failure line. Realtime
    /// connect failures are refined further by the socket manager.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Network(_) | Self::Timeout(_) | Self::ConnectionTimeout(_) => {
                "Unable to reach the server. Please check your connection."
            }
            Self::Auth(_) | Self::NoToken => "Your session has expired. Please sign in again.",
            Self::Cancelled => "The request was cancelled.",
            _ => "Something went wrong. Please try again.",
        }
    }
}

impl From<serde_json::Error> for HdError {
    fn from(e: serde_json::Error) -> Self {
        HdError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for HdError {
    fn from(e: toml::de::Error) -> Self {
        HdError::Config(e.to_string())
    }
}

impl From<std::io::Error> for HdError {
    fn from(e: std::io::Error) -> Self {
        HdError::Storage(e.to_string())
    }
}

impl From<rusqlite::Error> for HdError {
    fn from(e: rusqlite::Error) -> Self {
        HdError::Storage(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(HdError::Network("refused".into()).is_retryable());
        assert!(HdError::Timeout("deadline".into()).is_retryable());
        assert!(HdError::Http { status: 500, message: "oops".into() }.is_retryable());
        assert!(HdError::Http { status: 503, message: "busy".into() }.is_retryable());
        assert!(!HdError::Http { status: 429, message: "slow down".into() }.is_retryable());
        assert!(!HdError::Http { status: 400, message: "bad".into() }.is_retryable());
        assert!(!HdError::Cancelled.is_retryable());
    }

    #[test]
    fn test_expected_statuses_not_reported() {
        for status in [401u16, 404, 429] {
            let err = HdError::Http { status, message: "x".into() };
            assert_eq!(err.report_severity(), None, "status {status}");
        }
        assert_eq!(
            HdError::Http { status: 500, message: "x".into() }.report_severity(),
            Some(Severity::Error)
        );
        assert_eq!(
            HdError::Http { status: 400, message: "x".into() }.report_severity(),
            Some(Severity::Warning)
        );
    }

    #[test]
    fn test_user_messages() {
        assert!(HdError::Network("x".into()).user_message().contains("connection"));
        assert!(HdError::Auth("x".into()).user_message().contains("sign in"));
    }

    #[test]
    fn test_display() {
        let err = HdError::Http { status: 502, message: "bad gateway".into() };
        assert_eq!(err.to_string(), "http error (status 502): bad gateway");
    }
}
