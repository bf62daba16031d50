//! Unix socket server for the bridge daemon.
//!
//! The server listens for host clients, spawns a `ConnectionHandler` per
//! connection, and pushes door state changes to subscribers.
//!
//! ```text
//! ┌─────────────────┐
//! │  BridgeServer   │
//! │  UnixListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐     ┌───────────┐ ┌────────────┐ ┌────────┐
//! │ConnectionHandler│────▶│ DoorHandle│ │ Dispatcher │ │ Sensor │
//! │  (per client)   │     └───────────┘ └────────────┘ └────────┘
//! └─────────────────┘
//!         ▲ state_changed
//!         │
//! ┌─────────────────┐
//! │ DoorEvent feed  │
//! └─────────────────┘
//! ```

mod connection;

pub use connection::{ConnectionError, ConnectionHandler, SubscriberWriter, SubscribersMap};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::UnixListener;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use rtb_core::AccessoryInfo;
use rtb_protocol::DaemonMessage;

use crate::dispatcher::CommandDispatcher;
use crate::door::{DoorEvent, DoorHandle};
use crate::sensor::TemperatureSensor;

/// Unix socket server for the bridge daemon.
pub struct BridgeServer {
    /// Path to the Unix socket
    socket_path: PathBuf,

    /// Handle to the door actor
    door: DoorHandle,

    /// Open/close command dispatcher
    dispatcher: Arc<CommandDispatcher>,

    /// Temperature sensor
    sensor: Arc<TemperatureSensor>,

    /// Accessory identification for handshakes
    accessory: AccessoryInfo,

    /// Cancellation token for graceful shutdown
    cancel_token: CancellationToken,

    /// Connection counter for generating client IDs
    connection_counter: AtomicU64,

    /// Active subscribers (keyed by client_id)
    subscribers: SubscribersMap,
}

impl BridgeServer {
    /// Creates a new bridge server.
    pub fn new(
        socket_path: impl Into<PathBuf>,
        door: DoorHandle,
        dispatcher: CommandDispatcher,
        sensor: TemperatureSensor,
        accessory: AccessoryInfo,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            socket_path: socket_path.into(),
            door,
            dispatcher: Arc::new(dispatcher),
            sensor: Arc::new(sensor),
            accessory,
            cancel_token,
            connection_counter: AtomicU64::new(0),
            subscribers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Returns the socket path.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Runs the server until the cancellation token fires.
    pub async fn run(&self) -> Result<(), ServerError> {
        // Remove a stale socket file from an earlier run.
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| ServerError::SocketSetup {
                path: self.socket_path.clone(),
                error: e.to_string(),
            })?;
        }

        if let Some(parent) = self.socket_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| ServerError::SocketSetup {
                    path: self.socket_path.clone(),
                    error: e.to_string(),
                })?;
            }
        }

        let listener =
            UnixListener::bind(&self.socket_path).map_err(|e| ServerError::SocketSetup {
                path: self.socket_path.clone(),
                error: e.to_string(),
            })?;

        info!(socket = %self.socket_path.display(), "bridge server listening");

        self.spawn_event_broadcaster();

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("server shutdown requested");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let conn_num = self.connection_counter.fetch_add(1, Ordering::Relaxed);
                            self.handle_connection(stream, conn_num);
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                        }
                    }
                }
            }
        }

        self.cleanup().await;
        Ok(())
    }

    /// Handles a new client connection by spawning a handler task.
    fn handle_connection(&self, stream: tokio::net::UnixStream, connection_number: u64) {
        let (reader, writer) = stream.into_split();
        let subscribers = Arc::clone(&self.subscribers);

        let handler = ConnectionHandler::new(
            reader,
            writer,
            self.door.clone(),
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.sensor),
            self.accessory.clone(),
            Arc::clone(&subscribers),
            connection_number,
        );

        tokio::spawn(async move {
            let client_id = handler.run().await;

            // Drop any leftover subscription.
            if let Some(id) = client_id {
                let mut subs = subscribers.write().await;
                if subs.remove(&id).is_some() {
                    debug!(client_id = %id, "removed disconnected subscriber");
                }
            }
        });
    }

    /// Spawns the event broadcaster task.
    ///
    /// Receives door change events and pushes `state_changed` lines to
    /// every subscriber.
    fn spawn_event_broadcaster(&self) {
        let mut event_rx = self.door.subscribe();
        let subscribers = Arc::clone(&self.subscribers);
        let cancel_token = self.cancel_token.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        debug!("event broadcaster shutting down");
                        break;
                    }

                    result = event_rx.recv() => {
                        match result {
                            Ok(event) => broadcast_event(&subscribers, event).await,
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                warn!(skipped = n, "event broadcaster lagged, skipped events");
                            }
                            Err(broadcast::error::RecvError::Closed) => {
                                debug!("door event channel closed");
                                break;
                            }
                        }
                    }
                }
            }
        });
    }

    /// Returns the number of active subscribers.
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Performs cleanup on shutdown.
    async fn cleanup(&self) {
        {
            let mut subs = self.subscribers.write().await;
            subs.clear();
        }

        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(
                    socket = %self.socket_path.display(),
                    error = %e,
                    "failed to remove socket file"
                );
            }
        }

        info!("server cleanup complete");
    }
}

/// Pushes one door change to all subscribers, evicting dead writers.
async fn broadcast_event(subscribers: &SubscribersMap, event: DoorEvent) {
    let DoorEvent::Changed { view } = event;
    let msg = DaemonMessage::state_changed(*view);

    let json = match serde_json::to_string(&msg) {
        Ok(j) => j,
        Err(e) => {
            error!(error = %e, "failed to serialize state change");
            return;
        }
    };

    let subs = subscribers.read().await;
    let mut failed_clients = Vec::new();

    for (client_id, writer) in subs.iter() {
        let mut writer = writer.lock().await;
        let send_result = async {
            writer.write_all(json.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
            Ok::<(), std::io::Error>(())
        }
        .await;

        if let Err(e) = send_result {
            debug!(client_id = %client_id, error = %e, "failed to push state change");
            failed_clients.push(client_id.clone());
        }
    }

    // Evicting needs the write lock.
    drop(subs);

    if !failed_clients.is_empty() {
        let mut subs = subscribers.write().await;
        for client_id in failed_clients {
            subs.remove(&client_id);
            debug!(client_id = %client_id, "removed failed subscriber");
        }
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to set up socket at {path}: {error}")]
    SocketSetup { path: PathBuf, error: String },

    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_error_display() {
        let err = ServerError::SocketSetup {
            path: PathBuf::from("/tmp/test.sock"),
            error: "permission denied".to_string(),
        };
        assert!(err.to_string().contains("/tmp/test.sock"));
        assert!(err.to_string().contains("permission denied"));
    }
}
