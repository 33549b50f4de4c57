//! Error types for the MTConnect client.
//!
//! Failures fall into four families:
//! - transport failures (connection, HTTP status, timeouts) which the
//!   streaming client retries after its backoff interval
//! - Agent error documents (`MTConnectError` responses) carried as
//!   [`MTConnectError::Protocol`]
//! - decode failures where a body is neither the expected document nor an
//!   error document
//! - cancellation, which is never reported as a failure

use std::sync::Arc;

use crate::types::ErrorDocument;

/// Unified error type for all client operations.
///
/// Variants are `Clone` so they can travel through the client's broadcast
/// event channel.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MTConnectError {
    /// Transport-level error (connection refused, DNS failure, broken stream).
    #[error("Transport error: {0}")]
    Transport(String),

    /// Request timed out, or the stream watchdog expired.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Non-2xx HTTP status whose body was not an Agent error document.
    #[error("HTTP {status}: {body}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body text.
        body: String,
    },

    /// The Agent answered with an `MTConnectError` document.
    #[error("Agent error: {}", summarize(.0))]
    Protocol(Arc<ErrorDocument>),

    /// The body decoded neither as the expected document nor as an error
    /// document.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The stream buffered more unframed text than the configured limit.
    #[error("Frame too large: {size} bytes buffered without a complete document (limit {limit})")]
    FrameTooLarge {
        /// Bytes currently buffered.
        size: usize,
        /// Configured maximum.
        limit: usize,
    },

    /// Invalid client configuration (bad base URL, zero intervals, ...).
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The operation was cancelled by `stop()`.
    #[error("Cancelled")]
    Cancelled,
}

/// Convenience result type for client operations.
pub type MTConnectResult<T> = Result<T, MTConnectError>;

impl MTConnectError {
    /// Returns `true` for failures the streaming client handles by reconnecting
    /// after its retry interval.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            MTConnectError::Transport(_) | MTConnectError::Timeout(_) | MTConnectError::Http { .. }
        )
    }

    /// Returns `true` if this error is a cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, MTConnectError::Cancelled)
    }

    /// Returns the Agent error document, if this is a protocol error.
    pub fn error_document(&self) -> Option<&ErrorDocument> {
        match self {
            MTConnectError::Protocol(doc) => Some(doc.as_ref()),
            _ => None,
        }
    }
}

fn summarize(doc: &ErrorDocument) -> String {
    if doc.errors.is_empty() {
        return "no error entries".to_string();
    }
    doc.errors
        .iter()
        .map(|e| format!("{} ({})", e.message, e.error_code))
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<serde_json::Error> for MTConnectError {
    fn from(err: serde_json::Error) -> Self {
        MTConnectError::Decode(format!("invalid JSON document: {err}"))
    }
}

impl From<quick_xml::Error> for MTConnectError {
    fn from(err: quick_xml::Error) -> Self {
        MTConnectError::Decode(format!("invalid XML document: {err}"))
    }
}

impl From<url::ParseError> for MTConnectError {
    fn from(err: url::ParseError) -> Self {
        MTConnectError::InvalidConfig(format!("invalid URL: {err}"))
    }
}
