//! Error types for the snapshot layer.

use thiserror::Error;

/// Result type alias for snapshot operations.
pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// Error variants for snapshot operations.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Block engine failure while reading or writing a stream.
    #[error("engine error: {0}")]
    Engine(#[from] cellar_engine::EngineError),

    /// Wraps standard I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Directory listing or snapshot info failed to (de)serialise.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Snapshot name does not match the nonce-derived naming scheme.
    #[error("invalid snapshot name {0:?}")]
    InvalidName(String),

    /// Snapshot index file failed authenticated decryption.
    #[error("failed to decrypt snapshot {0}")]
    DecryptionFailure(String),
}
