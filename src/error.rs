//! Error types for vaultsync operations.

use thiserror::Error;

/// Errors that can occur in the vaultsync core.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error surfaced from an underlying byte channel.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame declared an impossible size or ended mid-frame.
    /// Fatal to the stream; there is no resync.
    #[error("Framing error: {0}")]
    Framing(String),

    /// AEAD open failure, handshake mismatch or identity rejection.
    /// Fatal to the stream or session.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// A node had an unexpected variant or could not be resolved
    /// during replay. Aborts the current atomic scope.
    #[error("Bad node: {0}")]
    BadNode(String),

    /// A path has no node in the graph.
    #[error("No such node: {0}")]
    NotFound(String),

    /// Caller violated an operation's precondition.
    #[error("Precondition violated: {0}")]
    Precondition(String),

    /// Key setup or derivation failed.
    #[error("Cryptography error: {0}")]
    Crypto(String),

    /// Encoding or decoding a structured message failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Compression or decompression failed.
    #[error("Compression error: {0}")]
    Compression(String),
}

/// Result type for vaultsync operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        use std::io::ErrorKind;

        match err {
            Error::Io(io) => io,
            other => {
                let kind = match &other {
                    Error::NotFound(_) => ErrorKind::NotFound,
                    Error::Auth(_) => ErrorKind::PermissionDenied,
                    Error::Precondition(_) => ErrorKind::InvalidInput,
                    _ => ErrorKind::InvalidData,
                };
                std::io::Error::new(kind, other.to_string())
            }
        }
    }
}
