//! Error types for alert-sentinel

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Errors that can occur in the store, bus, and server layers
#[derive(Debug, Error)]
pub enum SentinelError {
    /// Backing store unreachable
    #[error("Connection error: {0}")]
    Connection(String),

    /// Backend command failure (Redis, in-memory, etc.)
    #[error("Backend error: {0}")]
    Backend(String),

    /// Publish failure on the event channel
    #[error("Failed to publish to channel '{channel}': {reason}")]
    Publish { channel: String, reason: String },

    /// Subscribe failure on the event channel
    #[error("Failed to subscribe to channel '{channel}': {reason}")]
    Subscribe { channel: String, reason: String },

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation exceeded the request deadline
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP server error
    #[error("Server error: {0}")]
    Server(String),
}

impl From<redis::RedisError> for SentinelError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_dropped() || err.is_connection_refusal() || err.is_io_error() {
            SentinelError::Connection(err.to_string())
        } else {
            SentinelError::Backend(err.to_string())
        }
    }
}

impl From<toml::de::Error> for SentinelError {
    fn from(err: toml::de::Error) -> Self {
        SentinelError::Config(err.to_string())
    }
}

/// Result type alias for sentinel operations
pub type Result<T> = std::result::Result<T, SentinelError>;

impl IntoResponse for SentinelError {
    fn into_response(self) -> Response {
        // Detail stays in the logs; callers only get a short reason.
        let (status, reason) = match &self {
            SentinelError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "store timeout"),
            SentinelError::Connection(_) => (StatusCode::SERVICE_UNAVAILABLE, "store unavailable"),
            SentinelError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "misconfigured"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal error"),
        };

        tracing::error!(error = %self, status = status.as_u16(), "Request failed");

        (status, Json(serde_json::json!({ "error": reason }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_maps_to_gateway_timeout() {
        let resp = SentinelError::Timeout("add".into()).into_response();
        assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn test_connection_maps_to_unavailable() {
        let resp = SentinelError::Connection("refused".into()).into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_backend_maps_to_internal() {
        let resp = SentinelError::Backend("WRONGTYPE".into()).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_display_includes_channel() {
        let err = SentinelError::Publish {
            channel: "alert_events".into(),
            reason: "closed".into(),
        };
        assert!(err.to_string().contains("alert_events"));
    }
}
