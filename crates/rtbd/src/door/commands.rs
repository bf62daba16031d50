//! Door actor commands, errors, and events.

use rtb_core::{DomainError, DoorView, MonitorHealth, TargetState};
use thiserror::Error;
use tokio::sync::oneshot;

/// Commands sent to the door actor.
///
/// Each query/update command carries a oneshot channel for the response;
/// health updates are fire-and-forget.
#[derive(Debug)]
pub enum DoorCommand {
    /// Apply one raw report payload from the monitor stream.
    Report {
        /// Raw line as read from the monitor's stdout.
        line: String,
        /// Channel to send the resulting view (or the drop reason).
        respond_to: oneshot::Sender<Result<DoorView, DoorError>>,
    },

    /// Record a requested target state (optimistic, before the command
    /// script has run).
    SetIntent {
        target: TargetState,
        /// Channel to send the updated view.
        respond_to: oneshot::Sender<DoorView>,
    },

    /// Read the current view.
    Snapshot {
        respond_to: oneshot::Sender<DoorView>,
    },

    /// Update the supervisor's health signal.
    SetMonitorHealth { health: MonitorHealth },
}

/// Errors that can occur during door actor operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DoorError {
    /// The report payload was dropped (empty or otherwise unusable).
    #[error(transparent)]
    Report(#[from] DomainError),

    /// The actor has shut down.
    #[error("door actor channel closed")]
    ChannelClosed,
}

/// Events published by the door actor to subscribers.
#[derive(Debug, Clone)]
pub enum DoorEvent {
    /// The host-visible characteristics changed.
    Changed {
        /// The updated view (boxed for enum size).
        view: Box<DoorView>,
    },
}
