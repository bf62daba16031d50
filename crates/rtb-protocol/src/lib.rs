//! RTB Protocol - Wire protocol between the bridge daemon and host clients
//!
//! Messages are single lines of JSON over a Unix socket. Clients open with
//! a `connect` request carrying their protocol version; the daemon accepts
//! compatible clients and answers every subsequent request with exactly one
//! reply, plus unsolicited `state_changed` events for subscribers.

pub mod message;
pub mod version;

pub use message::{codes, ClientMessage, DaemonMessage, RequestType};
pub use version::ProtocolVersion;
