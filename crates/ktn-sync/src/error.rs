//! Error types for the sync module.

use std::time::Duration;

use ktn_core::{CoreError, EntityKind};
use thiserror::Error;

/// Errors that can occur while pairing or syncing.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Malformed or wrong-kind signaling payload, or a negotiation step
    /// called in the wrong role or state. Recoverable by re-entering the code.
    #[error("invalid signaling: {0}")]
    InvalidSignaling(String),

    /// The underlying transport reported failure.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The logical channel did not become usable in time.
    #[error("connection timed out after {0:?}")]
    ConnectionTimeout(Duration),

    /// The channel closed mid-send or mid-sync.
    #[error("channel closed")]
    ChannelClosed,

    /// One entity could not be merged. Logged and skipped by the batch.
    #[error("failed to merge {kind} {id:?}: {reason}")]
    MergeEntity {
        kind: EntityKind,
        id: Option<String>,
        reason: String,
    },

    /// Unknown or malformed application frame.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Another session is already active on this engine.
    #[error("a sync session is already in progress")]
    SessionBusy,

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] ktn_store::StoreError),

    /// Signaling codec or fragment error.
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Coarse classification, for status events and programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncErrorKind {
    InvalidSignaling,
    ConnectionFailed,
    ConnectionTimeout,
    ChannelClosed,
    MergeEntity,
    InvalidMessage,
    SessionBusy,
    Storage,
    Internal,
}

impl SyncError {
    pub fn kind(&self) -> SyncErrorKind {
        match self {
            SyncError::InvalidSignaling(_) => SyncErrorKind::InvalidSignaling,
            SyncError::ConnectionFailed(_) => SyncErrorKind::ConnectionFailed,
            SyncError::ConnectionTimeout(_) => SyncErrorKind::ConnectionTimeout,
            SyncError::ChannelClosed => SyncErrorKind::ChannelClosed,
            SyncError::MergeEntity { .. } => SyncErrorKind::MergeEntity,
            SyncError::InvalidMessage(_) => SyncErrorKind::InvalidMessage,
            SyncError::SessionBusy => SyncErrorKind::SessionBusy,
            SyncError::Store(_) => SyncErrorKind::Storage,
            SyncError::Core(
                CoreError::InvalidSignaling(_)
                | CoreError::InvalidFragment(_)
                | CoreError::MissingFragment { .. },
            ) => SyncErrorKind::InvalidSignaling,
            SyncError::Core(_) | SyncError::Serialization(_) => SyncErrorKind::Internal,
        }
    }

    /// Short text for the person holding the device. Details go to the log.
    pub fn user_message(&self) -> &'static str {
        match self.kind() {
            SyncErrorKind::InvalidSignaling => {
                "That pairing code could not be read. Scan or paste it again."
            }
            SyncErrorKind::ConnectionFailed => {
                "Could not connect to the other device. Start pairing again."
            }
            SyncErrorKind::ConnectionTimeout => {
                "The other device did not respond in time. Start pairing again."
            }
            SyncErrorKind::ChannelClosed => {
                "The connection was lost. Changes received so far were kept."
            }
            SyncErrorKind::MergeEntity => "Some items could not be synced and were skipped.",
            SyncErrorKind::InvalidMessage => "The other device sent data this version cannot read.",
            SyncErrorKind::SessionBusy => "A sync is already in progress.",
            SyncErrorKind::Storage => "Local storage is unavailable, so sync is turned off.",
            SyncErrorKind::Internal => "Sync failed unexpectedly.",
        }
    }

    /// Whether the current session must end.
    ///
    /// Signaling and per-message errors are recovered by retrying the step.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self.kind(),
            SyncErrorKind::InvalidSignaling
                | SyncErrorKind::MergeEntity
                | SyncErrorKind::InvalidMessage
                | SyncErrorKind::SessionBusy
        )
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_errors_read_as_signaling() {
        let err = SyncError::from(CoreError::MissingFragment { index: 2, total: 3 });
        assert_eq!(err.kind(), SyncErrorKind::InvalidSignaling);
        assert!(!err.is_terminal());
    }

    #[test]
    fn test_user_message_hides_detail() {
        let err = SyncError::ConnectionFailed("ice state failed on 10.0.0.3:5000".into());
        assert!(!err.user_message().contains("10.0.0.3"));
        assert!(err.is_terminal());
    }

    #[test]
    fn test_every_kind_has_message() {
        let errors = [
            SyncError::InvalidSignaling("x".into()),
            SyncError::ConnectionTimeout(Duration::from_secs(30)),
            SyncError::ChannelClosed,
            SyncError::MergeEntity {
                kind: EntityKind::Note,
                id: Some("N1".into()),
                reason: "bad".into(),
            },
            SyncError::InvalidMessage("x".into()),
            SyncError::SessionBusy,
        ];
        for err in errors {
            assert!(!err.user_message().is_empty());
        }
    }
}
