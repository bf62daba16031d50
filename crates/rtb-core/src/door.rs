//! Door state domain model.
//!
//! The monitor helper describes the door with single uppercase tokens
//! (OPEN, CLOSED, OPENING, CLOSING, STOPPED). This module reconciles
//! that report stream into the three host-visible characteristics:
//! current state, target state, and obstruction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{DomainError, DomainResult};

/// Accessory manufacturer reported to the host.
pub const MANUFACTURER: &str = "Lo-tech";

/// Accessory model reported to the host.
pub const MODEL: &str = "PDT RollerTec";

// ============================================================================
// Characteristic Enums
// ============================================================================

/// Observed door state.
///
/// The numeric code is the externally observable value and matches the
/// HomeKit `CurrentDoorState` characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum DoorState {
    Open = 0,
    Closed = 1,
    Opening = 2,
    Closing = 3,
    Stopped = 4,
}

impl DoorState {
    /// Returns the numeric characteristic code.
    #[must_use]
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl From<DoorState> for u8 {
    fn from(state: DoorState) -> Self {
        state as u8
    }
}

impl TryFrom<u8> for DoorState {
    type Error = DomainError;

    fn try_from(value: u8) -> DomainResult<Self> {
        match value {
            0 => Ok(Self::Open),
            1 => Ok(Self::Closed),
            2 => Ok(Self::Opening),
            3 => Ok(Self::Closing),
            4 => Ok(Self::Stopped),
            _ => Err(DomainError::InvalidCode {
                field: "current door state",
                value,
            }),
        }
    }
}

impl fmt::Display for DoorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => f.write_str("open"),
            Self::Closed => f.write_str("closed"),
            Self::Opening => f.write_str("opening"),
            Self::Closing => f.write_str("closing"),
            Self::Stopped => f.write_str("stopped"),
        }
    }
}

/// Intended door state (binary intent).
///
/// The numeric code matches the HomeKit `TargetDoorState` characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum TargetState {
    Open = 0,
    Closed = 1,
}

impl TargetState {
    /// Returns the numeric characteristic code.
    #[must_use]
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl From<TargetState> for u8 {
    fn from(target: TargetState) -> Self {
        target as u8
    }
}

impl TryFrom<u8> for TargetState {
    type Error = DomainError;

    fn try_from(value: u8) -> DomainResult<Self> {
        match value {
            0 => Ok(Self::Open),
            1 => Ok(Self::Closed),
            _ => Err(DomainError::InvalidCode {
                field: "target door state",
                value,
            }),
        }
    }
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => f.write_str("open"),
            Self::Closed => f.write_str("closed"),
        }
    }
}

/// Health of the supervised monitor process.
///
/// `Degraded` means the restart budget is exhausted and the reported door
/// state may be stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorHealth {
    /// Monitor has not produced its first report yet.
    Starting,
    /// Monitor process is running.
    Running,
    /// Monitor crashed and a restart is pending.
    Restarting,
    /// Restart budget exhausted; reports are no longer expected.
    Degraded,
}

impl MonitorHealth {
    /// Returns the display label for this health state.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Restarting => "restarting",
            Self::Degraded => "degraded",
        }
    }
}

impl fmt::Display for MonitorHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// Report Tokens
// ============================================================================

/// A single state token emitted by the monitor helper.
///
/// Tokens the helper is not known to emit are retained as `Unrecognized`
/// rather than rejected: an unknown signal is treated as a jam downstream,
/// never silently ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportToken {
    Open,
    Closed,
    Opening,
    Closing,
    Stopped,
    Unrecognized(String),
}

impl ReportToken {
    /// Parses the first line of a raw monitor payload.
    ///
    /// Only the first line is considered; surrounding whitespace is
    /// trimmed. An empty payload is an error, which the caller logs and
    /// drops without changing state.
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let line = raw.lines().next().unwrap_or("").trim();
        if line.is_empty() {
            return Err(DomainError::EmptyReport);
        }
        Ok(match line {
            "OPEN" => Self::Open,
            "CLOSED" => Self::Closed,
            "OPENING" => Self::Opening,
            "CLOSING" => Self::Closing,
            "STOPPED" => Self::Stopped,
            other => Self::Unrecognized(other.to_string()),
        })
    }
}

impl fmt::Display for ReportToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => f.write_str("OPEN"),
            Self::Closed => f.write_str("CLOSED"),
            Self::Opening => f.write_str("OPENING"),
            Self::Closing => f.write_str("CLOSING"),
            Self::Stopped => f.write_str("STOPPED"),
            Self::Unrecognized(token) => f.write_str(token),
        }
    }
}

// ============================================================================
// Door Model
// ============================================================================

/// Reconciled door state.
///
/// Two-field model: `observed` is what the monitor last reported,
/// `intended` is the direction the door is meant to move in. A command
/// request updates only `intended`; ground truth arrives exclusively
/// through reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoorModel {
    observed: DoorState,
    intended: TargetState,
    obstruction: bool,
}

impl DoorModel {
    /// Creates the initial model.
    ///
    /// The door is assumed closed until the monitor says otherwise.
    #[must_use]
    pub fn new() -> Self {
        Self {
            observed: DoorState::Closed,
            intended: TargetState::Closed,
            obstruction: false,
        }
    }

    /// Returns the last observed door state.
    #[must_use]
    pub fn observed(&self) -> DoorState {
        self.observed
    }

    /// Returns the current intent.
    #[must_use]
    pub fn intended(&self) -> TargetState {
        self.intended
    }

    /// Returns whether an obstruction is presumed.
    #[must_use]
    pub fn obstruction(&self) -> bool {
        self.obstruction
    }

    /// Applies one raw report payload.
    ///
    /// Returns `Ok(true)` when the (observed, intended, obstruction)
    /// triple changed, `Ok(false)` when the report repeated the current
    /// state, and an error for an empty payload (state untouched).
    ///
    /// With `ignore_errors` set, a literal STOPPED report is remapped to
    /// CLOSED before the mapping is applied. Unrecognized tokens are not
    /// remapped; they always land in the jam branch.
    pub fn apply_report(&mut self, raw: &str, ignore_errors: bool) -> DomainResult<bool> {
        let mut token = ReportToken::parse(raw)?;
        if ignore_errors && token == ReportToken::Stopped {
            token = ReportToken::Closed;
        }

        let before = (self.observed, self.intended, self.obstruction);
        match token {
            ReportToken::Open => {
                self.observed = DoorState::Open;
                self.intended = TargetState::Open;
                self.obstruction = false;
            }
            ReportToken::Closed => {
                self.observed = DoorState::Closed;
                self.intended = TargetState::Closed;
                self.obstruction = false;
            }
            ReportToken::Opening => {
                self.observed = DoorState::Opening;
                self.intended = TargetState::Open;
                self.obstruction = false;
            }
            ReportToken::Closing => {
                self.observed = DoorState::Closing;
                self.intended = TargetState::Closed;
                self.obstruction = false;
            }
            ReportToken::Stopped | ReportToken::Unrecognized(_) => {
                // Presume jammed. The intent is left alone: direction
                // cannot be inferred from noise.
                self.observed = DoorState::Stopped;
                self.obstruction = true;
            }
        }
        Ok(before != (self.observed, self.intended, self.obstruction))
    }

    /// Records a requested target without touching the observed state.
    ///
    /// Returns whether the intent changed.
    pub fn set_intent(&mut self, target: TargetState) -> bool {
        let changed = self.intended != target;
        self.intended = target;
        changed
    }
}

impl Default for DoorModel {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Host-Visible Views
// ============================================================================

/// Snapshot of the accessory characteristics exposed to host clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoorView {
    /// Configured accessory name.
    pub name: String,

    /// Door serial number (display only).
    pub serial_number: String,

    /// Current door state code (0-4).
    pub current_state: DoorState,

    /// Target door state code (0-1).
    pub target_state: TargetState,

    /// Whether an obstruction is presumed.
    pub obstruction: bool,

    /// Health of the supervised monitor process.
    pub monitor_health: MonitorHealth,

    /// When the view last changed.
    pub updated_at: DateTime<Utc>,
}

/// Static accessory identification reported at connection time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessoryInfo {
    pub manufacturer: String,
    pub model: String,
    pub name: String,
    pub serial_number: String,
}

impl AccessoryInfo {
    /// Creates accessory info for the configured name and serial.
    pub fn new(name: impl Into<String>, serial_number: impl Into<String>) -> Self {
        Self {
            manufacturer: MANUFACTURER.to_string(),
            model: MODEL.to_string(),
            name: name.into(),
            serial_number: serial_number.into(),
        }
    }
}
