//! Crate-wide error type.
//!
//! Grounded on `calimero-dag`'s `DagError`/`ApplyError` split: a small set of
//! `thiserror` variants, each wrapping just enough context to explain itself
//! without the caller needing to inspect the source.

use thiserror::Error;

use crate::path::Path;

/// Errors raised anywhere in the datasync engine.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WebcomError {
    /// DNS, TCP, TLS, or WebSocket handshake failure. Recoverable via reconnect.
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed frame from the server, unknown action, or bad envelope.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server responded to a request with a non-`ok` status.
    #[error("request failed: {status}")]
    Request {
        status: String,
        data: Option<serde_json::Value>,
    },

    /// A path string failed to parse.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// A value could not be interpreted as a tree node.
    #[error("invalid json: {0}")]
    InvalidJson(String),

    /// The operation was attempted after the context was closed.
    #[error("context closed")]
    ContextClosed,
}

impl WebcomError {
    pub(crate) fn invalid_path(s: impl Into<String>) -> Self {
        Self::InvalidPath(s.into())
    }
}

/// Convenience conversion for the common case of reporting an error about a
/// specific path, without forcing every call site to format its own string.
#[allow(dead_code)]
pub(crate) fn invalid_path_for(path: &Path) -> WebcomError {
    WebcomError::InvalidPath(path.to_string())
}

impl From<serde_json::Error> for WebcomError {
    fn from(e: serde_json::Error) -> Self {
        WebcomError::InvalidJson(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WebcomError>;
