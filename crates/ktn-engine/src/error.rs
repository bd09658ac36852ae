//! Error types for the engine.

use ktn_core::CoreError;
use ktn_store::StoreError;
use ktn_sync::SyncError;
use thiserror::Error;

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The device identity could not be loaded or saved. Sync is unavailable
    /// until this is fixed; everything else keeps working.
    #[error("identity store error: {0}")]
    IdentityStore(String),

    /// Another pairing session is already running on this engine.
    #[error("a pairing session is already active")]
    SessionBusy,

    /// Sync error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl EngineError {
    /// Short text for the person holding the device.
    pub fn user_message(&self) -> &'static str {
        match self {
            EngineError::IdentityStore(_) => {
                "This device's sync identity could not be loaded. Sync is unavailable."
            }
            EngineError::SessionBusy => "A sync is already in progress.",
            EngineError::Sync(e) => e.user_message(),
            EngineError::Store(_) => "Your notes could not be read or saved.",
            EngineError::Core(_) => "Something went wrong. Please try again.",
        }
    }

    /// Whether retrying the same step can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::SessionBusy => true,
            EngineError::Sync(e) => !e.is_terminal(),
            _ => false,
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
