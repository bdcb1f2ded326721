//! Error types for the jidl protocol.

use crate::status::StatusCode;

/// Errors surfaced by the codec, the server and the client.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// A network-level failure underneath the protocol.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A protocol-level failure, described by the bad-response status code
    /// that a peer would send (or sent) for it.
    #[error("protocol error: {}", .0.text_message())]
    Status(StatusCode),

    /// The request did not complete within the caller-supplied timeout.
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    /// TLS key material is missing or unreadable at construction time.
    #[error("invalid TLS material: {0}")]
    AuthMaterial(String),
}

impl ProtocolError {
    /// The status code a server should answer with for this error, if any.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            ProtocolError::Status(code) => Some(*code),
            _ => None,
        }
    }
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
