//! Door state reconciler using the Actor pattern.
//!
//! The door actor is the single owner of the reconciled door state. It
//! receives commands via a tokio mpsc channel and publishes change events
//! via broadcast, so report arrival, intent writes, and health updates are
//! strictly serialized - no locking exists on door state.
//!
//! ```text
//! ┌──────────────────┐     ┌───────────────┐     ┌──────────────────┐
//! │ MonitorSupervisor│────▶│   DoorActor   │────▶│ Broadcast Channel │
//! │ CommandDispatcher│     │ (state owner) │     │  (DoorEvent)      │
//! └──────────────────┘     └───────────────┘     └──────────────────┘
//!         DoorCommand (mpsc)                       subscribed clients
//! ```

use tokio::sync::{broadcast, mpsc};

use rtb_core::AccessoryInfo;

mod actor;
mod commands;
mod handle;

pub use actor::DoorActor;
pub use commands::{DoorCommand, DoorError, DoorEvent};
pub use handle::DoorHandle;

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 64;
const EVENT_BUFFER: usize = 64;

/// Spawns the door actor and returns a handle for interaction.
pub fn spawn_door(accessory: AccessoryInfo, ignore_errors: bool) -> DoorHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

    let actor = DoorActor::new(cmd_rx, event_tx.clone(), accessory, ignore_errors);
    tokio::spawn(actor.run());

    DoorHandle::new(cmd_tx, event_tx)
}
