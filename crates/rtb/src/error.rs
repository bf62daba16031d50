//! Client-side error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors talking to the bridge daemon.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The daemon socket could not be reached.
    #[error("failed to connect to {}: {source} (is rtbd running?)", .path.display())]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The connection failed mid-conversation.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The daemon closed the connection.
    #[error("daemon closed the connection")]
    Disconnected,

    /// The daemon rejected the handshake.
    #[error("connection rejected: {0}")]
    Rejected(String),

    /// The daemon sent something this client cannot interpret.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The daemon answered with an error message.
    #[error("daemon error: {message}")]
    Daemon {
        message: String,
        code: Option<String>,
    },
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
