//! Protocol message types for daemon communication.

use crate::version::ProtocolVersion;
use rtb_core::{AccessoryInfo, DoorView, TargetState};
use serde::{Deserialize, Serialize};

/// Machine-readable error codes carried by [`DaemonMessage::Error`].
pub mod codes {
    /// Open/close script could not run or exited nonzero.
    pub const COMMAND_FAILED: &str = "command_failed";
    /// Temperature payload failed its CRC check.
    pub const SENSOR_CRC: &str = "sensor_crc";
    /// Temperature file could not be read or parsed.
    pub const SENSOR_READ: &str = "sensor_read";
    /// Request was malformed or arrived out of sequence.
    pub const BAD_REQUEST: &str = "bad_request";
}

/// Request types clients can send to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestType {
    /// Client handshake/connection request.
    Connect {
        /// Client identifier (optional).
        #[serde(skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },

    /// Request the current door characteristics.
    GetState,

    /// Request a door movement towards `target`.
    SetTarget {
        /// Requested target state (0 = open, 1 = closed).
        target: TargetState,
    },

    /// Request a temperature reading.
    GetTemperature,

    /// Subscribe to pushed state changes.
    Subscribe,

    /// Stop receiving pushed state changes.
    Unsubscribe,

    /// Ping to check the connection.
    Ping {
        /// Sequence number echoed in the pong.
        seq: u64,
    },

    /// Client disconnecting gracefully.
    Disconnect,
}

/// Messages sent from client to daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMessage {
    /// Protocol version.
    pub protocol_version: ProtocolVersion,

    /// Message payload.
    #[serde(flatten)]
    pub request: RequestType,
}

impl ClientMessage {
    /// Creates a new client message with the current protocol version.
    pub fn new(request: RequestType) -> Self {
        Self {
            protocol_version: ProtocolVersion::CURRENT,
            request,
        }
    }

    /// Creates a connect message.
    pub fn connect(client_id: Option<String>) -> Self {
        Self::new(RequestType::Connect { client_id })
    }

    /// Creates a state request.
    pub fn get_state() -> Self {
        Self::new(RequestType::GetState)
    }

    /// Creates a door movement request.
    pub fn set_target(target: TargetState) -> Self {
        Self::new(RequestType::SetTarget { target })
    }

    /// Creates a temperature request.
    pub fn get_temperature() -> Self {
        Self::new(RequestType::GetTemperature)
    }

    /// Creates a subscribe message.
    pub fn subscribe() -> Self {
        Self::new(RequestType::Subscribe)
    }

    /// Creates a ping message.
    pub fn ping(seq: u64) -> Self {
        Self::new(RequestType::Ping { seq })
    }

    /// Creates a disconnect message.
    pub fn disconnect() -> Self {
        Self::new(RequestType::Disconnect)
    }
}

/// Messages sent from daemon to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonMessage {
    /// Connection accepted.
    Connected {
        /// Daemon's protocol version.
        protocol_version: ProtocolVersion,
        /// Assigned client ID.
        client_id: String,
        /// Static accessory identification.
        accessory: AccessoryInfo,
    },

    /// Connection rejected (version mismatch, etc.).
    Rejected {
        /// Reason for rejection.
        reason: String,
        /// Daemon's protocol version (for the client to upgrade).
        protocol_version: ProtocolVersion,
    },

    /// Current door characteristics (reply to `get_state`/`set_target`).
    State {
        /// The current view (boxed for enum size).
        view: Box<DoorView>,
    },

    /// Door characteristics changed (pushed to subscribers).
    StateChanged {
        /// The updated view (boxed for enum size).
        view: Box<DoorView>,
    },

    /// Temperature reading in degrees Celsius.
    Temperature {
        celsius: f64,
    },

    /// Pong response to ping.
    Pong {
        /// Sequence number from the ping.
        seq: u64,
    },

    /// Error response.
    Error {
        /// Human-readable message.
        message: String,
        /// Machine-readable code (see [`codes`]).
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl DaemonMessage {
    /// Creates a connected response.
    pub fn connected(client_id: impl Into<String>, accessory: AccessoryInfo) -> Self {
        Self::Connected {
            protocol_version: ProtocolVersion::CURRENT,
            client_id: client_id.into(),
            accessory,
        }
    }

    /// Creates a rejected response.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
            protocol_version: ProtocolVersion::CURRENT,
        }
    }

    /// Creates a state reply.
    pub fn state(view: DoorView) -> Self {
        Self::State {
            view: Box::new(view),
        }
    }

    /// Creates a pushed state-change event.
    pub fn state_changed(view: DoorView) -> Self {
        Self::StateChanged {
            view: Box::new(view),
        }
    }

    /// Creates a temperature reply.
    pub fn temperature(celsius: f64) -> Self {
        Self::Temperature { celsius }
    }

    /// Creates an error response without a code.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            code: None,
        }
    }

    /// Creates an error response with a machine-readable code.
    pub fn error_with_code(message: impl Into<String>, code: &str) -> Self {
        Self::Error {
            message: message.into(),
            code: Some(code.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rtb_core::{DoorState, MonitorHealth};

    fn sample_view() -> DoorView {
        DoorView {
            name: "Garage Door".to_string(),
            serial_number: "PDT-1".to_string(),
            current_state: DoorState::Opening,
            target_state: TargetState::Open,
            obstruction: false,
            monitor_health: MonitorHealth::Running,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_set_target_wire_format() {
        let msg = ClientMessage::set_target(TargetState::Closed);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "set_target");
        assert_eq!(json["target"], 1);
        assert_eq!(json["protocol_version"]["major"], 1);
    }

    #[test]
    fn test_client_message_round_trip() {
        let messages = vec![
            ClientMessage::connect(Some("host-1".to_string())),
            ClientMessage::get_state(),
            ClientMessage::set_target(TargetState::Open),
            ClientMessage::get_temperature(),
            ClientMessage::subscribe(),
            ClientMessage::ping(7),
            ClientMessage::disconnect(),
        ];
        for msg in messages {
            let json = serde_json::to_string(&msg).unwrap();
            let parsed: ClientMessage = serde_json::from_str(&json).unwrap();
            assert_eq!(
                serde_json::to_string(&parsed).unwrap(),
                json,
                "round trip for {json}"
            );
        }
    }

    #[test]
    fn test_state_changed_carries_codes() {
        let msg = DaemonMessage::state_changed(sample_view());
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "state_changed");
        assert_eq!(json["view"]["current_state"], 2);
        assert_eq!(json["view"]["target_state"], 0);
        assert_eq!(json["view"]["obstruction"], false);
        assert_eq!(json["view"]["monitor_health"], "running");
    }

    #[test]
    fn test_connected_includes_accessory_info() {
        let msg = DaemonMessage::connected("client-3", AccessoryInfo::new("Garage Door", "PDT-1"));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["accessory"]["manufacturer"], "Lo-tech");
        assert_eq!(json["accessory"]["model"], "PDT RollerTec");
        assert_eq!(json["client_id"], "client-3");
    }

    #[test]
    fn test_error_code_is_omitted_when_absent() {
        let json = serde_json::to_value(DaemonMessage::error("nope")).unwrap();
        assert!(json.get("code").is_none());

        let json =
            serde_json::to_value(DaemonMessage::error_with_code("nope", codes::BAD_REQUEST))
                .unwrap();
        assert_eq!(json["code"], "bad_request");
    }

    #[test]
    fn test_daemon_message_round_trip() {
        let messages = vec![
            DaemonMessage::connected("c", AccessoryInfo::new("d", "s")),
            DaemonMessage::rejected("old client"),
            DaemonMessage::state(sample_view()),
            DaemonMessage::state_changed(sample_view()),
            DaemonMessage::temperature(21.5),
            DaemonMessage::Pong { seq: 3 },
            DaemonMessage::error_with_code("boom", codes::COMMAND_FAILED),
        ];
        for msg in messages {
            let json = serde_json::to_string(&msg).unwrap();
            let parsed: DaemonMessage = serde_json::from_str(&json).unwrap();
            assert_eq!(serde_json::to_string(&parsed).unwrap(), json);
        }
    }
}
