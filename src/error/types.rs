//! Error types for the Lumo session client.

use thiserror::Error;

/// Main error type for session and transport operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Configuration-related errors.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Connection lifecycle errors.
    #[error("Connection error: {kind}")]
    Connection { kind: ConnectionErrorKind },

    /// Protocol errors.
    #[error("Protocol error: {kind}")]
    Protocol { kind: ProtocolErrorKind },

    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Connection error kinds.
#[derive(Error, Debug)]
pub enum ConnectionErrorKind {
    #[error("Failed to open session: {message}")]
    OpenFailed { message: String },

    #[error("Connect timed out after {timeout_ms} ms")]
    ConnectTimeout { timeout_ms: u64 },

    #[error("Read failed: {message}")]
    ReadFailed { message: String },

    #[error("Write failed: {message}")]
    WriteFailed { message: String },

    #[error("Stream ended")]
    Ended,
}

/// Protocol error kinds.
#[derive(Error, Debug)]
pub enum ProtocolErrorKind {
    #[error("Message too large: {size} bytes exceeds maximum of {max} bytes")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Invalid message format: {message}")]
    InvalidMessageFormat { message: String },
}

/// Terminal failure delivered to a single request's completion handle.
///
/// Unlike [`SessionError`] this is `Clone`, since every clone of a
/// completion handle observes the same outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("Request timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("Session closed")]
    SessionClosed,

    #[error("Session invalidated: {reason}")]
    SessionInvalidated { reason: String },

    #[error("Session ended before a response arrived")]
    SessionEnded,

    #[error("Session is not open")]
    NotOpen,

    #[error("Request id '{id}' is already pending")]
    DuplicateId { id: String },

    #[error("Request too large: {size} bytes exceeds maximum of {max} bytes")]
    TooLarge { size: usize, max: usize },

    #[error("Failed to encode request: {message}")]
    Encode { message: String },

    #[error("Failed to decode response: {message}")]
    Decode { message: String, data: Vec<u8> },

    #[error("Response rejected: {message}")]
    Validation { message: String, data: Vec<u8> },
}

impl RequestError {
    /// Stable error code, suitable for logs and metrics labels.
    pub fn code(&self) -> &'static str {
        match self {
            RequestError::Timeout { .. } => "REQUEST_TIMEOUT",
            RequestError::SessionClosed => "SESSION_CLOSED",
            RequestError::SessionInvalidated { .. } => "SESSION_INVALIDATED",
            RequestError::SessionEnded => "SESSION_ENDED",
            RequestError::NotOpen => "SESSION_NOT_OPEN",
            RequestError::DuplicateId { .. } => "DUPLICATE_ID",
            RequestError::TooLarge { .. } => "REQUEST_TOO_LARGE",
            RequestError::Encode { .. } => "ENCODE_ERROR",
            RequestError::Decode { .. } => "DECODE_ERROR",
            RequestError::Validation { .. } => "VALIDATION_ERROR",
        }
    }

    /// Raw response bytes kept for diagnostics, if the failure happened
    /// after data arrived.
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            RequestError::Decode { data, .. } | RequestError::Validation { data, .. } => {
                Some(data)
            }
            _ => None,
        }
    }
}

/// Result type alias for session operations.
pub type SessionResult<T> = Result<T, SessionError>;
