//! Remote API error types and transient/terminal classification.

use std::fmt;
use std::time::Duration;

/// Broad category of a remote API failure, used to decide retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// Connection failure, DNS error, or dropped socket.
    Network,
    /// The request exceeded the client-side timeout.
    Timeout,
    /// 429 from the service.
    RateLimited,
    /// 5xx from the service.
    Server,
    /// Non-retryable 4xx from the service.
    Client,
    /// The response body did not match the expected shape.
    Parse,
}

impl ApiErrorKind {
    /// Whether errors of this kind are worth retrying.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ApiErrorKind::Network
                | ApiErrorKind::Timeout
                | ApiErrorKind::RateLimited
                | ApiErrorKind::Server
        )
    }
}

impl fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ApiErrorKind::Network => "network",
            ApiErrorKind::Timeout => "timeout",
            ApiErrorKind::RateLimited => "rate-limited",
            ApiErrorKind::Server => "server",
            ApiErrorKind::Client => "client",
            ApiErrorKind::Parse => "parse",
        };
        f.write_str(name)
    }
}

/// A failed remote API call.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind} error{}: {message}", .status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default())]
pub struct ApiError {
    pub kind: ApiErrorKind,
    /// HTTP status, when the failure came from a response rather than the transport.
    pub status: Option<u16>,
    pub message: String,
    /// Server-provided Retry-After hint, honored over computed backoff.
    pub retry_after: Option<Duration>,
}

impl ApiError {
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::Network,
            status: None,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::Timeout,
            status: None,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::Parse,
            status: None,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Build an error from an HTTP response status and body.
    pub fn from_status(status: u16, body: &str, retry_after: Option<Duration>) -> Self {
        Self {
            kind: classify_http_status(status),
            status: Some(status),
            message: body.to_string(),
            retry_after,
        }
    }

    /// Whether this error is worth retrying.
    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

/// Classify an HTTP status code into an error kind.
///
/// Rate limits (429) and server errors (5xx) are transient; all other 4xx
/// statuses are terminal.
pub fn classify_http_status(status: u16) -> ApiErrorKind {
    match status {
        429 => ApiErrorKind::RateLimited,
        500..=599 => ApiErrorKind::Server,
        400..=499 => ApiErrorKind::Client,
        _ => ApiErrorKind::Server,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_statuses() {
        assert_eq!(classify_http_status(429), ApiErrorKind::RateLimited);
        assert_eq!(classify_http_status(500), ApiErrorKind::Server);
        assert_eq!(classify_http_status(503), ApiErrorKind::Server);
        assert_eq!(classify_http_status(400), ApiErrorKind::Client);
        assert_eq!(classify_http_status(404), ApiErrorKind::Client);
    }

    #[test]
    fn test_transient_kinds() {
        assert!(ApiError::network("connection reset").is_transient());
        assert!(ApiError::timeout("deadline exceeded").is_transient());
        assert!(ApiError::from_status(429, "slow down", None).is_transient());
        assert!(ApiError::from_status(502, "bad gateway", None).is_transient());
        assert!(!ApiError::from_status(404, "no such task", None).is_transient());
        assert!(!ApiError::parse("unexpected body").is_transient());
    }

    #[test]
    fn test_display_includes_status() {
        let err = ApiError::from_status(404, "no such task", None);
        let text = err.to_string();
        assert!(text.contains("HTTP 404"));
        assert!(text.contains("no such task"));
    }
}
