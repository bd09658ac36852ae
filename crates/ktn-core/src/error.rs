//! Error types for ktn core.

use thiserror::Error;

/// Errors produced by the pure primitives.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Signaling payload is malformed or of the wrong kind.
    #[error("invalid signaling payload: {0}")]
    InvalidSignaling(String),

    /// A `KTN1:` fragment carries an impossible index or total.
    #[error("invalid fragment: {0}")]
    InvalidFragment(String),

    /// Reassembly was finished while a fragment was still missing.
    #[error("missing fragment {index} of {total}")]
    MissingFragment { index: usize, total: usize },

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("invalid device id: {0}")]
    InvalidDeviceId(String),

    /// Persisted identity record does not decode or its key pair is inconsistent.
    #[error("invalid identity record: {0}")]
    InvalidIdentity(String),

    #[error("encoding error: {0}")]
    EncodingError(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
