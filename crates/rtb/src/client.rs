//! Daemon connection client.
//!
//! Wraps the line protocol in a request/reply interface: connect, perform
//! the version handshake, then issue one request at a time. `watch`
//! switches the connection into subscription mode and streams pushed
//! state changes.

use std::path::Path;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tracing::debug;

use rtb_core::{AccessoryInfo, DoorView, TargetState};
use rtb_protocol::{ClientMessage, DaemonMessage};

use crate::error::{ClientError, Result};

/// Client for communicating with the bridge daemon.
#[derive(Debug)]
pub struct DaemonClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    accessory: AccessoryInfo,
    client_id: String,
}

impl DaemonClient {
    /// Connects to the daemon and performs the protocol handshake.
    pub async fn connect(socket_path: &Path) -> Result<Self> {
        let stream =
            UnixStream::connect(socket_path)
                .await
                .map_err(|source| ClientError::Connect {
                    path: socket_path.to_path_buf(),
                    source,
                })?;
        let (reader, writer) = stream.into_split();

        let mut client = Self {
            reader: BufReader::new(reader),
            writer,
            accessory: AccessoryInfo::new("", ""),
            client_id: String::new(),
        };

        client.send(&ClientMessage::connect(None)).await?;
        match client.recv().await? {
            DaemonMessage::Connected {
                client_id,
                accessory,
                ..
            } => {
                debug!(client_id = %client_id, "connected to bridge daemon");
                client.client_id = client_id;
                client.accessory = accessory;
                Ok(client)
            }
            DaemonMessage::Rejected { reason, .. } => Err(ClientError::Rejected(reason)),
            other => Err(ClientError::Protocol(format!(
                "unexpected handshake reply: {other:?}"
            ))),
        }
    }

    /// Returns the accessory identification from the handshake.
    pub fn accessory(&self) -> &AccessoryInfo {
        &self.accessory
    }

    /// Returns the client id assigned by the daemon.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Fetches the current door characteristics.
    pub async fn get_state(&mut self) -> Result<DoorView> {
        match self.request(ClientMessage::get_state()).await? {
            DaemonMessage::State { view } => Ok(*view),
            other => Err(unexpected(other)),
        }
    }

    /// Requests a door movement and returns the (optimistic) view.
    pub async fn set_target(&mut self, target: TargetState) -> Result<DoorView> {
        match self.request(ClientMessage::set_target(target)).await? {
            DaemonMessage::State { view } => Ok(*view),
            other => Err(unexpected(other)),
        }
    }

    /// Fetches a temperature reading in degrees Celsius.
    pub async fn get_temperature(&mut self) -> Result<f64> {
        match self.request(ClientMessage::get_temperature()).await? {
            DaemonMessage::Temperature { celsius } => Ok(celsius),
            other => Err(unexpected(other)),
        }
    }

    /// Subscribes to state changes and feeds every view to `on_view`
    /// until the daemon closes the connection.
    ///
    /// The initial state is delivered first, then each pushed change.
    pub async fn watch<F>(mut self, mut on_view: F) -> Result<()>
    where
        F: FnMut(&DoorView),
    {
        self.send(&ClientMessage::subscribe()).await?;

        loop {
            match self.recv().await {
                Ok(DaemonMessage::State { view }) | Ok(DaemonMessage::StateChanged { view }) => {
                    on_view(&view);
                }
                Ok(DaemonMessage::Error { message, code }) => {
                    return Err(ClientError::Daemon { message, code });
                }
                Ok(other) => {
                    debug!(message = ?other, "ignoring unexpected push");
                }
                Err(ClientError::Disconnected) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    /// Sends one request and reads one reply, mapping daemon-reported
    /// errors into `ClientError::Daemon`.
    pub async fn request(&mut self, msg: ClientMessage) -> Result<DaemonMessage> {
        self.send(&msg).await?;
        match self.recv().await? {
            DaemonMessage::Error { message, code } => Err(ClientError::Daemon { message, code }),
            reply => Ok(reply),
        }
    }

    async fn send(&mut self, msg: &ClientMessage) -> Result<()> {
        let json = serde_json::to_string(msg)
            .map_err(|e| ClientError::Protocol(format!("failed to encode request: {e}")))?;
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<DaemonMessage> {
        let mut line = String::new();
        let bytes_read = self.reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            return Err(ClientError::Disconnected);
        }
        serde_json::from_str(&line)
            .map_err(|e| ClientError::Protocol(format!("failed to decode reply: {e}")))
    }
}

fn unexpected(msg: DaemonMessage) -> ClientError {
    ClientError::Protocol(format!("unexpected reply: {msg:?}"))
}
