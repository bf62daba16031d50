//! Connection handler for individual host clients.
//!
//! Each client connection gets its own `ConnectionHandler` that performs
//! protocol version negotiation, parses incoming requests, routes them to
//! the door actor / dispatcher / sensor, and answers each request with
//! exactly one reply. Malformed requests are answered with an error
//! without dropping the connection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use rtb_core::AccessoryInfo;
use rtb_protocol::{codes, ClientMessage, DaemonMessage, ProtocolVersion, RequestType};

use crate::dispatcher::CommandDispatcher;
use crate::door::DoorHandle;
use crate::sensor::TemperatureSensor;

/// Type alias for subscriber writer handle
pub type SubscriberWriter = Arc<Mutex<BufWriter<OwnedWriteHalf>>>;

/// Type alias for the subscribers map
pub type SubscribersMap = Arc<RwLock<HashMap<String, SubscriberWriter>>>;

/// Maximum number of concurrent host clients
pub(crate) const MAX_CLIENTS: usize = 8;

/// Maximum request size (64 KB)
const MAX_MESSAGE_SIZE: usize = 65_536;

/// Read timeout for idle connections (5 minutes)
const READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Write timeout (10 seconds)
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Unique identifier for this connection
type ClientId = String;

/// Errors on a single client connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("client closed the connection")]
    Eof,

    #[error("connection idle timeout")]
    Timeout,

    #[error("write timeout")]
    WriteTimeout,

    #[error("request too large ({size} bytes, max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("malformed request: {0}")]
    Parse(String),

    #[error("protocol version {client} not compatible with {server}")]
    VersionMismatch {
        client: ProtocolVersion,
        server: ProtocolVersion,
    },

    #[error("unexpected message: {0}")]
    UnexpectedMessage(String),
}

/// Connection handler for a single host client.
pub struct ConnectionHandler {
    /// Buffered reader for incoming requests
    reader: BufReader<OwnedReadHalf>,

    /// Buffered writer for replies (shared for event broadcast)
    writer: SubscriberWriter,

    /// Handle to the door actor
    door: DoorHandle,

    /// Open/close command dispatcher
    dispatcher: Arc<CommandDispatcher>,

    /// Temperature sensor
    sensor: Arc<TemperatureSensor>,

    /// Accessory identification for the handshake reply
    accessory: AccessoryInfo,

    /// Shared subscribers map for event broadcasting
    subscribers: SubscribersMap,

    /// Unique client identifier (assigned after handshake)
    client_id: Option<ClientId>,

    /// Counter for generating client IDs
    connection_number: u64,
}

impl ConnectionHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        reader: OwnedReadHalf,
        writer: OwnedWriteHalf,
        door: DoorHandle,
        dispatcher: Arc<CommandDispatcher>,
        sensor: Arc<TemperatureSensor>,
        accessory: AccessoryInfo,
        subscribers: SubscribersMap,
        connection_number: u64,
    ) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer: Arc::new(Mutex::new(BufWriter::new(writer))),
            door,
            dispatcher,
            sensor,
            accessory,
            subscribers,
            client_id: None,
            connection_number,
        }
    }

    /// Runs the connection handler.
    ///
    /// Performs the handshake then enters the request loop. Returns the
    /// client id (if assigned) when the connection closes, so the server
    /// can drop any leftover subscription.
    pub async fn run(mut self) -> Option<ClientId> {
        debug!(connection = self.connection_number, "new client connected");

        if let Err(e) = self.handle_handshake().await {
            warn!(
                connection = self.connection_number,
                error = %e,
                "handshake failed"
            );
            return None;
        }

        let client_id = self.client_id.clone();

        if let Err(e) = self.process_requests().await {
            debug!(client_id = ?self.client_id, error = %e, "connection closed");
        }

        info!(client_id = ?self.client_id, "client disconnected");
        client_id
    }

    /// Handles the initial protocol handshake.
    ///
    /// Expects a `connect` request, validates the protocol version, and
    /// responds with `connected` (including accessory info) or `rejected`.
    async fn handle_handshake(&mut self) -> Result<(), ConnectionError> {
        let msg = self.read_request().await?;

        let client_version = msg.protocol_version;
        if !client_version.is_compatible_with(&ProtocolVersion::CURRENT) {
            warn!(
                client_version = %client_version,
                server_version = %ProtocolVersion::CURRENT,
                "protocol version mismatch"
            );

            self.send_reply(DaemonMessage::rejected(format!(
                "protocol version {client_version} not compatible with {}",
                ProtocolVersion::CURRENT
            )))
            .await?;

            return Err(ConnectionError::VersionMismatch {
                client: client_version,
                server: ProtocolVersion::CURRENT,
            });
        }

        match msg.request {
            RequestType::Connect { client_id } => {
                let assigned_id =
                    client_id.unwrap_or_else(|| format!("client-{}", self.connection_number));
                self.client_id = Some(assigned_id.clone());

                self.send_reply(DaemonMessage::connected(
                    assigned_id,
                    self.accessory.clone(),
                ))
                .await?;
                Ok(())
            }
            other => {
                self.send_reply(DaemonMessage::error("expected connect request"))
                    .await?;
                Err(ConnectionError::UnexpectedMessage(format!("{other:?}")))
            }
        }
    }

    /// Main request loop.
    async fn process_requests(&mut self) -> Result<(), ConnectionError> {
        loop {
            let msg = match timeout(READ_TIMEOUT, self.read_request()).await {
                Ok(Ok(msg)) => msg,
                Ok(Err(ConnectionError::Eof)) => {
                    debug!(client_id = ?self.client_id, "client sent EOF");
                    return Ok(());
                }
                Ok(Err(ConnectionError::Parse(reason))) => {
                    // A garbled line is answered, not fatal.
                    self.send_reply(DaemonMessage::error_with_code(reason, codes::BAD_REQUEST))
                        .await?;
                    continue;
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    debug!(client_id = ?self.client_id, "connection timed out");
                    return Err(ConnectionError::Timeout);
                }
            };

            match msg.request {
                RequestType::Disconnect => {
                    debug!(client_id = ?self.client_id, "client requested disconnect");
                    return Ok(());
                }
                request => self.handle_request(request).await?,
            }
        }
    }

    /// Handles a single request, sending exactly one reply.
    async fn handle_request(&mut self, request: RequestType) -> Result<(), ConnectionError> {
        match request {
            RequestType::Connect { .. } => {
                self.send_reply(DaemonMessage::error_with_code(
                    "already connected",
                    codes::BAD_REQUEST,
                ))
                .await?;
            }

            RequestType::GetState => {
                let reply = match self.door.snapshot().await {
                    Ok(view) => DaemonMessage::state(view),
                    Err(e) => DaemonMessage::error(e.to_string()),
                };
                self.send_reply(reply).await?;
            }

            RequestType::SetTarget { target } => {
                // Only execution-level failure is surfaced; whether the
                // door reaches the target is the monitor's verdict.
                let reply = match self.dispatcher.request(target).await {
                    Ok(()) => match self.door.snapshot().await {
                        Ok(view) => DaemonMessage::state(view),
                        Err(e) => DaemonMessage::error(e.to_string()),
                    },
                    Err(e) => {
                        DaemonMessage::error_with_code(e.to_string(), codes::COMMAND_FAILED)
                    }
                };
                self.send_reply(reply).await?;
            }

            RequestType::GetTemperature => {
                let reply = match self.sensor.read().await {
                    Ok(celsius) => DaemonMessage::temperature(celsius),
                    Err(e) => {
                        let code = if e.is_crc() {
                            codes::SENSOR_CRC
                        } else {
                            codes::SENSOR_READ
                        };
                        DaemonMessage::error_with_code(e.to_string(), code)
                    }
                };
                self.send_reply(reply).await?;
            }

            RequestType::Subscribe => {
                let Some(client_id) = self.client_id.clone() else {
                    self.send_reply(DaemonMessage::error("must connect before subscribing"))
                        .await?;
                    return Ok(());
                };

                {
                    let mut subs = self.subscribers.write().await;
                    if subs.len() >= MAX_CLIENTS && !subs.contains_key(&client_id) {
                        self.send_reply(DaemonMessage::error(format!(
                            "too many subscribers (max: {MAX_CLIENTS})"
                        )))
                        .await?;
                        return Ok(());
                    }
                    subs.insert(client_id.clone(), Arc::clone(&self.writer));
                }

                debug!(client_id = %client_id, "client subscribed to state changes");

                // Current view as the initial state.
                let reply = match self.door.snapshot().await {
                    Ok(view) => DaemonMessage::state(view),
                    Err(e) => DaemonMessage::error(e.to_string()),
                };
                self.send_reply(reply).await?;
            }

            RequestType::Unsubscribe => {
                if let Some(ref client_id) = self.client_id {
                    let mut subs = self.subscribers.write().await;
                    subs.remove(client_id);
                }
                debug!(client_id = ?self.client_id, "client unsubscribed");
            }

            RequestType::Ping { seq } => {
                self.send_reply(DaemonMessage::Pong { seq }).await?;
            }

            // Handled by the caller.
            RequestType::Disconnect => {}
        }

        Ok(())
    }

    /// Reads a single request line from the client.
    async fn read_request(&mut self) -> Result<ClientMessage, ConnectionError> {
        let mut line = String::new();

        let bytes_read = self
            .reader
            .read_line(&mut line)
            .await
            .map_err(|e| ConnectionError::Io(e.to_string()))?;

        if bytes_read == 0 {
            return Err(ConnectionError::Eof);
        }

        if line.len() > MAX_MESSAGE_SIZE {
            return Err(ConnectionError::MessageTooLarge {
                size: line.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }

        serde_json::from_str(&line).map_err(|e| ConnectionError::Parse(e.to_string()))
    }

    /// Sends one reply line to the client.
    async fn send_reply(&self, msg: DaemonMessage) -> Result<(), ConnectionError> {
        let json =
            serde_json::to_string(&msg).map_err(|e| ConnectionError::Parse(e.to_string()))?;

        let mut writer = self.writer.lock().await;

        match timeout(WRITE_TIMEOUT, async {
            writer.write_all(json.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
            Ok::<(), std::io::Error>(())
        })
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ConnectionError::Io(e.to_string())),
            Err(_) => Err(ConnectionError::WriteTimeout),
        }
    }
}
