//! Door actor - owns the reconciled door state and processes commands.

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use rtb_core::{AccessoryInfo, DoorModel, DoorView, MonitorHealth};

use super::commands::{DoorCommand, DoorError, DoorEvent};

/// The door actor - single owner of the reconciled door state.
///
/// Commands are processed sequentially in channel order, which realizes
/// the serialized-callback model: a report can never interleave with an
/// intent write or a health update.
pub struct DoorActor {
    /// Command receiver
    receiver: mpsc::Receiver<DoorCommand>,

    /// Reconciled state (observed, intended, obstruction)
    model: DoorModel,

    /// Static accessory identity carried into every view
    accessory: AccessoryInfo,

    /// Remap STOPPED reports to CLOSED
    ignore_errors: bool,

    /// Supervisor health signal
    monitor_health: MonitorHealth,

    /// When the public view last changed
    updated_at: DateTime<Utc>,

    /// Event publisher for subscribed clients
    event_publisher: broadcast::Sender<DoorEvent>,
}

impl DoorActor {
    /// Creates a new door actor.
    ///
    /// The model starts from the closed-door assumption; the monitor's
    /// first report corrects it.
    pub fn new(
        receiver: mpsc::Receiver<DoorCommand>,
        event_publisher: broadcast::Sender<DoorEvent>,
        accessory: AccessoryInfo,
        ignore_errors: bool,
    ) -> Self {
        Self {
            receiver,
            model: DoorModel::new(),
            accessory,
            ignore_errors,
            monitor_health: MonitorHealth::Starting,
            updated_at: Utc::now(),
            event_publisher,
        }
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands until the channel closes (all handles dropped).
    pub async fn run(mut self) {
        info!(name = %self.accessory.name, "door actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!("door actor stopped");
    }

    fn handle_command(&mut self, cmd: DoorCommand) {
        match cmd {
            DoorCommand::Report { line, respond_to } => {
                let result = self.handle_report(&line);
                // Ignore send error - the caller may have dropped the receiver
                let _ = respond_to.send(result);
            }
            DoorCommand::SetIntent { target, respond_to } => {
                if self.model.set_intent(target) {
                    info!(requested = %target, "target state requested");
                    self.touch_and_publish();
                }
                let _ = respond_to.send(self.view());
            }
            DoorCommand::Snapshot { respond_to } => {
                let _ = respond_to.send(self.view());
            }
            DoorCommand::SetMonitorHealth { health } => {
                if self.monitor_health != health {
                    debug!(health = %health, "monitor health changed");
                    self.monitor_health = health;
                    self.touch_and_publish();
                }
            }
        }
    }

    /// Applies one raw report payload.
    ///
    /// Bad input is logged and dropped; there are no retries. A repeated
    /// token is a no-change and is not re-published.
    fn handle_report(&mut self, line: &str) -> Result<DoorView, DoorError> {
        match self.model.apply_report(line, self.ignore_errors) {
            Ok(changed) => {
                debug!(
                    report = line.trim(),
                    changed,
                    current = %self.model.observed(),
                    intent = %self.model.intended(),
                    obstruction = self.model.obstruction(),
                    "door report applied"
                );
                if changed {
                    self.touch_and_publish();
                }
                Ok(self.view())
            }
            Err(e) => {
                warn!(error = %e, "dropping door report");
                Err(e.into())
            }
        }
    }

    fn touch_and_publish(&mut self) {
        self.updated_at = Utc::now();
        // No subscribers is fine - send only fails when none are listening
        let _ = self.event_publisher.send(DoorEvent::Changed {
            view: Box::new(self.view()),
        });
    }

    fn view(&self) -> DoorView {
        DoorView {
            name: self.accessory.name.clone(),
            serial_number: self.accessory.serial_number.clone(),
            current_state: self.model.observed(),
            target_state: self.model.intended(),
            obstruction: self.model.obstruction(),
            monitor_health: self.monitor_health,
            updated_at: self.updated_at,
        }
    }
}
