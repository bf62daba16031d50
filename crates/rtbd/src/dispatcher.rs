//! Door command dispatch.
//!
//! Executes the external open/close scripts when the host requests a
//! target state. The requested target is recorded in the door actor
//! before the script runs (optimistic), and only execution-level failure
//! is surfaced: whether the door actually reaches the target is decided
//! exclusively by the monitor stream, never by command completion.

use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use rtb_core::{BridgeConfig, TargetState};

use crate::door::{DoorError, DoorHandle};

/// Errors surfaced to the caller of a door command.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The requested target could not be recorded.
    #[error("failed to record requested target: {0}")]
    Door(#[from] DoorError),

    /// The script could not be started.
    #[error("failed to run {}: {source}", .command.display())]
    Spawn {
        command: PathBuf,
        source: std::io::Error,
    },

    /// The script ran but exited nonzero.
    #[error("{} exited with {status}: {stderr}", .command.display())]
    Failed {
        command: PathBuf,
        status: ExitStatus,
        stderr: String,
    },
}

/// Dispatches open/close requests to the configured scripts.
pub struct CommandDispatcher {
    open_command: PathBuf,
    close_command: PathBuf,
    status_file: PathBuf,
    door: DoorHandle,
}

impl CommandDispatcher {
    /// Creates a dispatcher from the bridge configuration.
    pub fn new(config: &BridgeConfig, door: DoorHandle) -> Self {
        Self {
            open_command: config.open_path(),
            close_command: config.close_path(),
            status_file: config.status_file.clone(),
            door,
        }
    }

    /// Requests a door movement towards `target`.
    ///
    /// The scripts receive the status file path as their single argument
    /// and print a final status string on success. Success here means
    /// only that the command ran.
    pub async fn request(&self, target: TargetState) -> Result<(), DispatchError> {
        // Optimistic: synchronous reads reflect intent immediately.
        self.door.set_intent(target).await?;

        let command = match target {
            TargetState::Open => &self.open_command,
            TargetState::Closed => &self.close_command,
        };
        info!(requested = %target, command = %command.display(), "dispatching door command");

        let output = Command::new(command)
            .arg(&self.status_file)
            .output()
            .await
            .map_err(|source| DispatchError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(status = %output.status, stderr = %stderr, "door command failed");
            return Err(DispatchError::Failed {
                command: command.clone(),
                status: output.status,
                stderr,
            });
        }

        let reported = String::from_utf8_lossy(&output.stdout);
        debug!(reported = reported.trim(), "door command completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::door::spawn_door;
    use rtb_core::AccessoryInfo;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn dispatcher_for(dir: &Path, open_body: &str, close_body: &str) -> (CommandDispatcher, crate::door::DoorHandle) {
        let door = spawn_door(AccessoryInfo::new("Test Door", "T-1"), false);
        let dispatcher = CommandDispatcher {
            open_command: write_script(dir, "open.sh", open_body),
            close_command: write_script(dir, "close.sh", close_body),
            status_file: dir.join("status"),
            door: door.clone(),
        };
        (dispatcher, door)
    }

    #[tokio::test]
    async fn test_successful_open_records_intent() {
        let dir = tempfile::tempdir().unwrap();
        let (dispatcher, door) = dispatcher_for(dir.path(), "echo OPENING", "echo CLOSING");

        dispatcher.request(TargetState::Open).await.unwrap();

        let view = door.snapshot().await.unwrap();
        assert_eq!(view.target_state, TargetState::Open);
        // Observed state is untouched: ground truth comes from the monitor.
        assert_eq!(view.current_state.code(), 1);
    }

    #[tokio::test]
    async fn test_script_receives_status_file_argument() {
        let dir = tempfile::tempdir().unwrap();
        let witness = dir.path().join("arg");
        let body = format!("echo \"$1\" > {}", witness.display());
        let (dispatcher, _door) = dispatcher_for(dir.path(), &body, "exit 0");

        dispatcher.request(TargetState::Open).await.unwrap();

        let recorded = std::fs::read_to_string(&witness).unwrap();
        assert_eq!(recorded.trim(), dir.path().join("status").display().to_string());
    }

    #[tokio::test]
    async fn test_failure_surfaces_stderr_but_keeps_intent() {
        let dir = tempfile::tempdir().unwrap();
        let (dispatcher, door) =
            dispatcher_for(dir.path(), "exit 0", "echo relay stuck >&2; exit 3");

        let err = dispatcher.request(TargetState::Closed).await.unwrap_err();
        match err {
            DispatchError::Failed { status, stderr, .. } => {
                assert_eq!(status.code(), Some(3));
                assert_eq!(stderr, "relay stuck");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // The optimistic write happened before the script ran.
        let view = door.snapshot().await.unwrap();
        assert_eq!(view.target_state, TargetState::Closed);
    }

    #[tokio::test]
    async fn test_missing_script_is_a_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let door = spawn_door(AccessoryInfo::new("Test Door", "T-1"), false);
        let dispatcher = CommandDispatcher {
            open_command: dir.path().join("does-not-exist"),
            close_command: dir.path().join("does-not-exist"),
            status_file: dir.path().join("status"),
            door,
        };

        let err = dispatcher.request(TargetState::Open).await.unwrap_err();
        assert!(matches!(err, DispatchError::Spawn { .. }));
    }
}
