//! RTB Core - Shared types for the RollerTec garage door bridge
//!
//! This crate provides the domain model shared between the bridge
//! daemon (rtbd) and the CLI client (rtb): door state reconciliation,
//! DS18B20 payload parsing, and bridge configuration.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`
//! outside of tests.

pub mod config;
pub mod door;
pub mod error;
pub mod sensor;

// Re-exports for convenience
pub use config::{BridgeConfig, ConfigError, SensorConfig};
pub use door::{
    AccessoryInfo, DoorModel, DoorState, DoorView, MonitorHealth, ReportToken, TargetState,
    MANUFACTURER, MODEL,
};
pub use error::{DomainError, DomainResult};
pub use sensor::{parse_w1_reading, ReadingError};
