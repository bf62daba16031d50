//! RTB - command line client for the RollerTec bridge daemon
//!
//! Speaks the rtb-protocol line protocol over the daemon's Unix socket.
//! Stands in for the smart-home host during operation and testing.

pub mod client;
pub mod error;

pub use client::DaemonClient;
pub use error::{ClientError, Result};
