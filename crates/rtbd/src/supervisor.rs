//! Monitor process supervision.
//!
//! Keeps exactly one door monitor helper alive, feeds its stdout lines to
//! the door actor, and recovers from unexpected termination.
//!
//! The helper's stdout is its only report channel; anything on stderr
//! means the helper itself is malfunctioning and is treated as fatal for
//! the whole daemon. Crashes (unexpected exits) are recovered with a
//! bounded exponential backoff; when the restart budget is exhausted the
//! door is marked degraded and the supervisor parks until shutdown, so
//! the bridge keeps serving the last known state.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use rtb_core::MonitorHealth;

use crate::door::DoorHandle;

/// How long a monitor gets to exit after SIGTERM before it is killed.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Errors that are fatal to the supervisor.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The monitor executable could not be started at all.
    #[error("failed to spawn door monitor {}: {source}", .command.display())]
    Spawn {
        command: PathBuf,
        source: std::io::Error,
    },

    /// A standard stream was not available after spawn.
    #[error("door monitor {0} pipe unavailable")]
    MissingPipe(&'static str),

    /// The helper wrote to stderr; it is malfunctioning rather than
    /// reporting a door event.
    #[error("door monitor reported an error: {message}")]
    HelperFailure { message: String },
}

// ============================================================================
// Restart Policy
// ============================================================================

/// Crash-restart policy.
///
/// Delays double from `initial_delay` up to `max_delay`. After
/// `max_consecutive_failures` crashes without a stable run in between,
/// the circuit opens and the monitor is not restarted again. A run of at
/// least `stable_uptime` resets the failure count.
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_consecutive_failures: u32,
    pub stable_uptime: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_consecutive_failures: 5,
            stable_uptime: Duration::from_secs(60),
        }
    }
}

/// What to do after the monitor process exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitAction {
    /// Intentional shutdown; no restart.
    Shutdown,
    /// Unplanned crash; restart after the given delay.
    Restart(Duration),
    /// Restart budget exhausted; mark degraded and stop retrying.
    Degrade,
}

/// Tracks consecutive failures against a [`RestartPolicy`].
#[derive(Debug)]
pub struct RestartBackoff {
    policy: RestartPolicy,
    consecutive_failures: u32,
}

impl RestartBackoff {
    /// Creates a fresh backoff tracker.
    pub fn new(policy: RestartPolicy) -> Self {
        Self {
            policy,
            consecutive_failures: 0,
        }
    }

    /// Records an exit after `uptime` and returns the next delay, or
    /// `None` when the budget is exhausted.
    pub fn on_exit(&mut self, uptime: Duration) -> Option<Duration> {
        if uptime >= self.policy.stable_uptime {
            self.consecutive_failures = 0;
        }
        self.consecutive_failures += 1;
        if self.consecutive_failures > self.policy.max_consecutive_failures {
            return None;
        }
        let exponent = (self.consecutive_failures - 1).min(16);
        let delay = self
            .policy
            .initial_delay
            .saturating_mul(1u32 << exponent)
            .min(self.policy.max_delay);
        Some(delay)
    }
}

/// Decides the action for a monitor exit.
///
/// Pure decision logic, kept separate from the process plumbing so the
/// policy is directly testable.
pub fn exit_action(terminating: bool, backoff: &mut RestartBackoff, uptime: Duration) -> ExitAction {
    if terminating {
        return ExitAction::Shutdown;
    }
    match backoff.on_exit(uptime) {
        Some(delay) => ExitAction::Restart(delay),
        None => ExitAction::Degrade,
    }
}

// ============================================================================
// Supervisor
// ============================================================================

/// Supervises the door monitor helper process.
pub struct MonitorSupervisor {
    command: PathBuf,
    door: DoorHandle,
    policy: RestartPolicy,
    cancel_token: CancellationToken,
}

impl MonitorSupervisor {
    /// Creates a supervisor for the given monitor executable.
    pub fn new(
        command: PathBuf,
        door: DoorHandle,
        policy: RestartPolicy,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            command,
            door,
            policy,
            cancel_token,
        }
    }

    /// Runs the supervisor until shutdown or a fatal helper error.
    ///
    /// Returns `Ok(())` on intentional shutdown (including the degraded
    /// park state) and an error when the daemon must terminate: a spawn
    /// failure, or any stderr output from the helper.
    pub async fn run(self) -> Result<(), SupervisorError> {
        let mut backoff = RestartBackoff::new(self.policy.clone());

        loop {
            let mut child = self.spawn_monitor()?;
            let started = Instant::now();
            self.door.set_monitor_health(MonitorHealth::Running).await;

            let stdout = child
                .stdout
                .take()
                .ok_or(SupervisorError::MissingPipe("stdout"))?;
            let stderr = child
                .stderr
                .take()
                .ok_or(SupervisorError::MissingPipe("stderr"))?;
            let mut out_lines = BufReader::new(stdout).lines();
            let mut err_lines = BufReader::new(stderr).lines();
            let mut stdout_open = true;
            let mut stderr_open = true;

            let status = loop {
                tokio::select! {
                    biased;

                    _ = self.cancel_token.cancelled() => {
                        return self.shutdown(child).await;
                    }

                    line = err_lines.next_line(), if stderr_open => match line {
                        Ok(Some(message)) => {
                            error!(%message, "door monitor wrote to stderr; treating as fatal");
                            let _ = child.start_kill();
                            return Err(SupervisorError::HelperFailure { message });
                        }
                        Ok(None) | Err(_) => stderr_open = false,
                    },

                    line = out_lines.next_line(), if stdout_open => match line {
                        Ok(Some(line)) => {
                            // Drop reasons are already logged by the actor.
                            if let Err(e) = self.door.report(line).await {
                                debug!(error = %e, "door report not applied");
                            }
                        }
                        Ok(None) | Err(_) => stdout_open = false,
                    },

                    status = child.wait() => break status,
                }
            };

            match status {
                Ok(status) => warn!(%status, "door monitor exited unexpectedly"),
                Err(e) => warn!(error = %e, "door monitor exit status unavailable"),
            }

            // Cancellation may have raced the exit; re-check so an exit
            // observed during shutdown never triggers a restart.
            let terminating = self.cancel_token.is_cancelled();
            match exit_action(terminating, &mut backoff, started.elapsed()) {
                ExitAction::Shutdown => {
                    debug!("door monitor exited during shutdown");
                    return Ok(());
                }
                ExitAction::Restart(delay) => {
                    self.door
                        .set_monitor_health(MonitorHealth::Restarting)
                        .await;
                    warn!(delay_ms = delay.as_millis() as u64, "restarting door monitor");
                    tokio::select! {
                        _ = self.cancel_token.cancelled() => return Ok(()),
                        _ = sleep(delay) => {}
                    }
                }
                ExitAction::Degrade => {
                    error!("door monitor restart budget exhausted; door state may be stale");
                    self.door.set_monitor_health(MonitorHealth::Degraded).await;
                    self.cancel_token.cancelled().await;
                    return Ok(());
                }
            }
        }
    }

    fn spawn_monitor(&self) -> Result<Child, SupervisorError> {
        info!(command = %self.command.display(), "starting door monitor");
        Command::new(&self.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SupervisorError::Spawn {
                command: self.command.clone(),
                source,
            })
    }

    /// Stops the monitor: SIGTERM, bounded grace wait, then SIGKILL.
    ///
    /// Resolves only once the exit is observed or the child has been
    /// force-killed.
    async fn shutdown(&self, mut child: Child) -> Result<(), SupervisorError> {
        info!("stopping door monitor");

        #[cfg(unix)]
        if let Some(pid) = child.id() {
            // SIGTERM first so the helper can release its interrupt handlers.
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
        }

        match timeout(SHUTDOWN_GRACE, child.wait()).await {
            Ok(Ok(status)) => debug!(%status, "door monitor exited"),
            Ok(Err(e)) => warn!(error = %e, "door monitor exit status unavailable"),
            Err(_) => {
                warn!(
                    grace_secs = SHUTDOWN_GRACE.as_secs(),
                    "door monitor did not exit in time; killing"
                );
                let _ = child.kill().await;
            }
        }
        Ok(())
    }
}
