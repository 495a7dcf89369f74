use axum::http::StatusCode;
use thiserror::Error;

/// Request-level failure taxonomy. Every variant maps to exactly one HTTP
/// status; the mapping is the single place downstream and parsing failures
/// become client-visible.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Invalid encoding")]
    InvalidEncoding,

    #[error("Malformed multipart body: {0}")]
    MalformedMultipart(String),

    #[error("Empty request")]
    EmptyRequest,

    #[error("Request too large ({length} bytes > limit {limit} bytes)")]
    PayloadTooLarge { length: u64, limit: u64 },

    #[error("Request timeout")]
    Timeout,

    #[error("Backend service unavailable: {last_error}")]
    DownstreamUnavailable { last_error: String },

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::InvalidJson(_)
            | ProxyError::InvalidEncoding
            | ProxyError::MalformedMultipart(_)
            | ProxyError::EmptyRequest => StatusCode::BAD_REQUEST,
            ProxyError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::Timeout => StatusCode::REQUEST_TIMEOUT,
            ProxyError::DownstreamUnavailable { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-readable label used in JSON error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::InvalidJson(_) => "invalid_json",
            ProxyError::InvalidEncoding => "invalid_encoding",
            ProxyError::MalformedMultipart(_) => "malformed_multipart",
            ProxyError::EmptyRequest => "empty_request",
            ProxyError::PayloadTooLarge { .. } => "payload_too_large",
            ProxyError::Timeout => "timeout",
            ProxyError::DownstreamUnavailable { .. } => "backend_unavailable",
            ProxyError::Internal(_) => "internal_error",
        }
    }
}

impl From<std::io::Error> for ProxyError {
    fn from(err: std::io::Error) -> Self {
        ProxyError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_match_taxonomy() {
        assert_eq!(
            ProxyError::InvalidJson("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ProxyError::PayloadTooLarge {
                length: 10,
                limit: 5
            }
            .status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(ProxyError::Timeout.status(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(
            ProxyError::DownstreamUnavailable {
                last_error: "refused".into()
            }
            .status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ProxyError::Internal("boom".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn messages_carry_detail_without_backtraces() {
        let err = ProxyError::DownstreamUnavailable {
            last_error: "connection refused".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("connection refused"));
        assert!(!msg.contains("src/"));
    }
}
