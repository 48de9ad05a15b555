//! Error types for the block engine.

use thiserror::Error;

use crate::reference::BlockRef;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Error variants for engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Wraps standard I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// On-disk block file is too short to contain a nonce and header.
    #[error("block {reference} on disk is too short: {len} bytes")]
    ShortBlock {
        /// The reference whose block file was undersized.
        reference: BlockRef,
        /// The actual file length.
        len: usize,
    },

    /// Authenticated decryption rejected the ciphertext.
    #[error("failed to decrypt block {reference}: bad key, truncation or tampering")]
    DecryptionFailure {
        /// The reference whose block failed to open.
        reference: BlockRef,
    },

    /// Decrypted block contents are malformed.
    #[error("corrupt block payload: {reason}")]
    CorruptPayload {
        /// Description of the malformation.
        reason: String,
    },

    /// Recomputed content hash does not match the reference used to fetch.
    #[error("block {expected} does not match its content hash {actual}")]
    ReferenceMismatch {
        /// The reference the block was fetched under.
        expected: BlockRef,
        /// The hash recomputed over the decoded payload.
        actual: BlockRef,
    },

    /// Reference string is not 48 hex characters.
    #[error("bad reference: {0}")]
    BadReference(String),

    /// Configuration value out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<EngineError> for std::io::Error {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Io(e) => e,
            other => std::io::Error::new(std::io::ErrorKind::InvalidData, other),
        }
    }
}
