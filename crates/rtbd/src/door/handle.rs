//! Client interface for interacting with the door actor.
//!
//! The `DoorHandle` is a cheap-to-clone handle for sending commands to
//! the door actor and subscribing to change events.

use tokio::sync::{broadcast, mpsc, oneshot};

use rtb_core::{DoorView, MonitorHealth, TargetState};

use super::commands::{DoorCommand, DoorError, DoorEvent};

/// Handle for interacting with the door actor.
///
/// All methods are async and communicate with the actor via channels;
/// clone freely across tasks.
#[derive(Clone)]
pub struct DoorHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<DoorCommand>,

    /// Event broadcaster for subscribing to updates
    event_sender: broadcast::Sender<DoorEvent>,
}

impl DoorHandle {
    /// Creates a new door handle.
    pub fn new(
        sender: mpsc::Sender<DoorCommand>,
        event_sender: broadcast::Sender<DoorEvent>,
    ) -> Self {
        Self {
            sender,
            event_sender,
        }
    }

    /// Applies one raw report payload from the monitor stream.
    ///
    /// # Errors
    ///
    /// - `DoorError::Report` if the payload was dropped (already logged
    ///   by the actor)
    /// - `DoorError::ChannelClosed` if the actor has shut down
    pub async fn report(&self, line: String) -> Result<DoorView, DoorError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(DoorCommand::Report {
                line,
                respond_to: tx,
            })
            .await
            .map_err(|_| DoorError::ChannelClosed)?;

        rx.await.map_err(|_| DoorError::ChannelClosed)?
    }

    /// Records a requested target state (optimistic write).
    ///
    /// # Errors
    ///
    /// - `DoorError::ChannelClosed` if the actor has shut down
    pub async fn set_intent(&self, target: TargetState) -> Result<DoorView, DoorError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(DoorCommand::SetIntent {
                target,
                respond_to: tx,
            })
            .await
            .map_err(|_| DoorError::ChannelClosed)?;

        rx.await.map_err(|_| DoorError::ChannelClosed)
    }

    /// Reads the current view.
    ///
    /// # Errors
    ///
    /// - `DoorError::ChannelClosed` if the actor has shut down
    pub async fn snapshot(&self) -> Result<DoorView, DoorError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(DoorCommand::Snapshot { respond_to: tx })
            .await
            .map_err(|_| DoorError::ChannelClosed)?;

        rx.await.map_err(|_| DoorError::ChannelClosed)
    }

    /// Updates the supervisor's health signal.
    ///
    /// Fire-and-forget: send errors are ignored (the actor may be
    /// shutting down).
    pub async fn set_monitor_health(&self, health: MonitorHealth) {
        let _ = self
            .sender
            .send(DoorCommand::SetMonitorHealth { health })
            .await;
    }

    /// Subscribes to change events.
    ///
    /// This is a synchronous operation - it doesn't communicate with the
    /// actor.
    pub fn subscribe(&self) -> broadcast::Receiver<DoorEvent> {
        self.event_sender.subscribe()
    }

    /// Returns true if the actor is still running.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}
