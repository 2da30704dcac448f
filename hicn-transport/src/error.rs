//! Transport error taxonomy.
//!
//! Recoverable conditions (a missed packet, a cache miss) are handled
//! locally by the protocols; what reaches the application through the read
//! callback or the produce result is one of these kinds.

use hicn_io::IoError;
use thiserror::Error;

/// Errors surfaced by the transport protocols.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    #[error("connector disconnected")]
    Disconnected,

    /// Internal signal: an interest missed the output buffer. Handled by
    /// the producer's cache-miss callback, never surfaced.
    #[error("interest missed the output buffer")]
    InterestCacheMiss,

    #[error("verification failed for suffix {suffix}")]
    VerificationFailed { suffix: u32 },

    #[error("invalid connector: {0}")]
    InvalidConnector(String),

    #[error("invalid connector type: {0}")]
    InvalidConnectorType(String),

    #[error("memory allocation failed")]
    MemoryAllocation,

    #[error("operation not implemented")]
    NotImplemented,

    #[error("producer unreachable")]
    ProducerUnreachable,

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("invalid packet: {0}")]
    InvalidPacket(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("auth error: {0}")]
    Auth(#[from] hicn_auth::AuthError),
}

impl From<IoError> for TransportError {
    fn from(err: IoError) -> Self {
        match err {
            IoError::Disconnected => TransportError::Disconnected,
            IoError::NotImplemented => TransportError::NotImplemented,
            IoError::InvalidConnector(s) => TransportError::InvalidConnector(s),
            IoError::InvalidConnectorType(s) => TransportError::InvalidConnectorType(s),
            other => TransportError::SendFailed(other.to_string()),
        }
    }
}
