//! Error types for the adapter.
//!
//! Malformed events (an update or delete for a key that is not cached) are
//! not errors: the reducer logs and drops them. Everything here is about the
//! conduit, the listener, and the facade lifecycle.

use std::net::SocketAddr;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Errors that can occur while feeding or serving the adapter.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The other end of the event conduit has gone away.
    #[error("event channel closed")]
    ChannelClosed,

    /// `serve` was called on an adapter that is already (or was) serving.
    #[error("adapter is already serving")]
    AlreadyServing,

    /// Binding the listener failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Graceful shutdown did not finish before the deadline.
    #[error("shutdown did not complete within {0:?}")]
    ShutdownTimeout(Duration),

    /// Serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Unexpected condition. The detail is kept for logs only; clients
    /// always see the generic message.
    #[error("internal error")]
    Internal(String),

    /// I/O error while serving.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for adapter operations.
pub type Result<T> = std::result::Result<T, AdapterError>;

impl AdapterError {
    /// Create an internal error carrying a detail for the logs.
    pub fn internal(detail: impl Into<String>) -> Self {
        AdapterError::Internal(detail.into())
    }

    /// Returns true if the adapter cannot keep running after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AdapterError::Bind { .. } | AdapterError::Io(_) | AdapterError::Internal(_)
        )
    }

    /// HTTP status reported to protocol clients.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AdapterError::ChannelClosed
            | AdapterError::AlreadyServing
            | AdapterError::ShutdownTimeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<serde_json::Error> for AdapterError {
    fn from(err: serde_json::Error) -> Self {
        AdapterError::Serialization(err.to_string())
    }
}

impl IntoResponse for AdapterError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Detail never crosses the wire.
        let body = if status == StatusCode::INTERNAL_SERVER_ERROR {
            "internal error".to_string()
        } else {
            self.to_string()
        };
        (status, body).into_response()
    }
}
