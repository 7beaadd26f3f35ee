//! Error types for RCS

use thiserror::Error;

/// Main error type for RCS
#[derive(Error, Debug)]
pub enum RcsError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Shutdown interrupted with {remaining} connection(s) still open")]
    ShutdownInterrupted { remaining: usize },
}

/// RCSP codec errors.
///
/// These describe bad data on the wire, never transport failures. A connection that
/// produces one stays open and receives a `NOT_OK` response.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed request")]
    MalformedRequest,

    #[error("malformed response")]
    MalformedResponse,

    #[error("unknown protocol")]
    UnknownProtocol,

    #[error("invalid key")]
    InvalidKey,

    #[error("invalid value")]
    InvalidValue,
}

impl ProtocolError {
    /// Diagnostic sent back to the client in the `MESSAGE` field
    pub fn client_message(self) -> &'static str {
        match self {
            ProtocolError::MalformedRequest => "Malformed request",
            ProtocolError::MalformedResponse => "Malformed response",
            ProtocolError::UnknownProtocol => "Unknown protocol",
            ProtocolError::InvalidKey => "Received invalid key",
            ProtocolError::InvalidValue => "Received invalid value",
        }
    }
}

pub type Result<T> = std::result::Result<T, RcsError>;
