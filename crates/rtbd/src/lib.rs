//! RTB Daemon - RollerTec garage door bridge
//!
//! This crate provides the infrastructure of the bridge daemon:
//! - `door` - door state actor reconciling monitor reports
//! - `supervisor` - lifecycle management for the monitor helper process
//! - `dispatcher` - external open/close script execution
//! - `sensor` - DS18B20 temperature reads
//! - `server` - Unix socket server for host clients
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                         rtbd daemon                           │
//! ├───────────────────────────────────────────────────────────────┤
//! │                                                               │
//! │  ┌────────────────┐  stdout lines   ┌─────────────────────┐   │
//! │  │MonitorSuperviso│───────────────▶│      DoorActor       │   │
//! │  │ (helper process│                 │  (door state owner)  │   │
//! │  └────────────────┘                 └─────────┬───────────┘   │
//! │                                               │ events        │
//! │  ┌────────────────┐  set_intent               ▼               │
//! │  │CommandDispatche│──────────────▶ ┌─────────────────────┐   │
//! │  │ (open/close)   │                 │    BridgeServer     │   │
//! │  └────────────────┘                 │  (host clients)     │   │
//! │                                     └─────────────────────┘   │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! All production code in this crate follows the panic-free policy:
//! no `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`.

pub mod dispatcher;
pub mod door;
pub mod sensor;
pub mod server;
pub mod supervisor;
