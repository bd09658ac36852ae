//! Status events for a presentation layer.
//!
//! The engine never renders anything. It reports stage changes, scan
//! progress, merge results and errors on an unbounded channel; whoever holds
//! the receiver decides how to show them.

use std::fmt;

use tokio::sync::mpsc;

use crate::error::{SyncError, SyncErrorKind};
use crate::reconcile::MergeReport;

/// Lifecycle of one pairing-and-sync session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionStage {
    Idle,
    Negotiating,
    Connecting,
    Open,
    Syncing,
    Done,
    Failed,
}

impl SessionStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStage::Done | SessionStage::Failed)
    }
}

impl fmt::Display for SessionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionStage::Idle => "idle",
            SessionStage::Negotiating => "negotiating",
            SessionStage::Connecting => "connecting",
            SessionStage::Open => "open",
            SessionStage::Syncing => "syncing",
            SessionStage::Done => "done",
            SessionStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    StageChanged(SessionStage),
    /// A pairing-code fragment was scanned.
    FragmentReceived { received: usize, total: usize },
    /// The exchange finished; totals across everything merged.
    Merged(MergeReport),
    Error {
        kind: SyncErrorKind,
        /// Short text fit for display.
        message: String,
    },
}

impl SyncEvent {
    pub fn error(err: &SyncError) -> Self {
        SyncEvent::Error {
            kind: err.kind(),
            message: err.user_message().to_string(),
        }
    }
}

/// Sending half of the event stream. Events are dropped once nobody listens.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<SyncEvent>>,
}

impl EventSink {
    /// A sink and the receiver for it.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SyncEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that discards everything.
    pub fn discard() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: SyncEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_event_carries_user_message() {
        let event = SyncEvent::error(&SyncError::ChannelClosed);
        assert_eq!(
            event,
            SyncEvent::Error {
                kind: SyncErrorKind::ChannelClosed,
                message: SyncError::ChannelClosed.user_message().to_string(),
            }
        );
    }

    #[test]
    fn test_sink_survives_dropped_receiver() {
        let (sink, rx) = EventSink::channel();
        drop(rx);
        sink.emit(SyncEvent::StageChanged(SessionStage::Open));
        EventSink::discard().emit(SyncEvent::StageChanged(SessionStage::Done));
    }

    #[test]
    fn test_terminal_stages() {
        assert!(SessionStage::Done.is_terminal());
        assert!(SessionStage::Failed.is_terminal());
        assert!(!SessionStage::Syncing.is_terminal());
        assert_eq!(SessionStage::Negotiating.to_string(), "negotiating");
    }
}
