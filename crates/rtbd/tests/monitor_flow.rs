//! Integration tests for monitor supervision.
//!
//! These tests drive the supervisor with real helper processes (shell
//! scripts) and verify that reports flow into the door actor, crashes
//! are restarted under the backoff policy, stderr output is fatal, and
//! shutdown is clean.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;

use rtb_core::{AccessoryInfo, DoorState, MonitorHealth};
use rtbd::door::{spawn_door, DoorHandle};
use rtbd::supervisor::{MonitorSupervisor, RestartPolicy, SupervisorError};

/// Upper bound for anything asynchronous in these tests.
const TEST_DEADLINE: Duration = Duration::from_secs(5);

fn write_script(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("monitor.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn fast_policy() -> RestartPolicy {
    RestartPolicy {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(40),
        max_consecutive_failures: 3,
        stable_uptime: Duration::from_secs(60),
    }
}

fn start_supervisor(
    command: PathBuf,
    policy: RestartPolicy,
) -> (
    DoorHandle,
    CancellationToken,
    tokio::task::JoinHandle<Result<(), SupervisorError>>,
) {
    let door = spawn_door(AccessoryInfo::new("Test Door", "T-1"), false);
    let cancel = CancellationToken::new();
    let supervisor = MonitorSupervisor::new(command, door.clone(), policy, cancel.clone());
    let task = tokio::spawn(supervisor.run());
    (door, cancel, task)
}

async fn wait_for_state(door: &DoorHandle, state: DoorState) {
    let start = Instant::now();
    loop {
        if door.snapshot().await.unwrap().current_state == state {
            return;
        }
        assert!(
            start.elapsed() < TEST_DEADLINE,
            "door never reached {state:?}"
        );
        sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_reports_flow_into_door_actor() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "printf 'OPENING\\nOPEN\\n'\nsleep 30");

    let (door, cancel, task) = start_supervisor(script, fast_policy());

    wait_for_state(&door, DoorState::Open).await;
    let view = door.snapshot().await.unwrap();
    assert_eq!(view.target_state.code(), 0);
    assert_eq!(view.monitor_health, MonitorHealth::Running);

    cancel.cancel();
    let result = timeout(TEST_DEADLINE + Duration::from_secs(6), task)
        .await
        .expect("supervisor did not stop")
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_crash_is_restarted_until_budget_exhausted() {
    let dir = tempfile::tempdir().unwrap();
    let count_file = dir.path().join("runs");
    let body = format!("echo run >> {}\nexit 1", count_file.display());
    let script = write_script(dir.path(), &body);

    let (door, cancel, task) = start_supervisor(script, fast_policy());

    // With a budget of 3 restarts, the helper runs 4 times and then the
    // supervisor degrades instead of retrying forever.
    let start = Instant::now();
    loop {
        let health = door.snapshot().await.unwrap().monitor_health;
        if health == MonitorHealth::Degraded {
            break;
        }
        assert!(start.elapsed() < TEST_DEADLINE, "never degraded");
        sleep(Duration::from_millis(10)).await;
    }

    let runs = std::fs::read_to_string(&count_file).unwrap();
    assert_eq!(runs.lines().count(), 4, "one initial run plus 3 restarts");

    // Degraded parks until shutdown; the daemon keeps serving state.
    assert!(!task.is_finished());
    cancel.cancel();
    let result = timeout(TEST_DEADLINE, task).await.unwrap().unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_stderr_output_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "echo broken >&2\nsleep 30");

    let (_door, _cancel, task) = start_supervisor(script, fast_policy());

    let result = timeout(TEST_DEADLINE, task).await.unwrap().unwrap();
    match result {
        Err(SupervisorError::HelperFailure { message }) => assert_eq!(message, "broken"),
        other => panic!("expected helper failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_monitor_is_a_spawn_error() {
    let dir = tempfile::tempdir().unwrap();
    let (_door, _cancel, task) =
        start_supervisor(dir.path().join("does-not-exist"), fast_policy());

    let result = timeout(TEST_DEADLINE, task).await.unwrap().unwrap();
    assert!(matches!(result, Err(SupervisorError::Spawn { .. })));
}

#[tokio::test]
async fn test_shutdown_terminates_helper_without_restart() {
    let dir = tempfile::tempdir().unwrap();
    let count_file = dir.path().join("runs");
    let body = format!("echo run >> {}\necho OPEN\nsleep 30", count_file.display());
    let script = write_script(dir.path(), &body);

    let (door, cancel, task) = start_supervisor(script, fast_policy());

    wait_for_state(&door, DoorState::Open).await;
    cancel.cancel();

    let result = timeout(TEST_DEADLINE + Duration::from_secs(6), task)
        .await
        .expect("supervisor did not stop")
        .unwrap();
    assert!(result.is_ok());

    // The intentional termination suppressed the restart.
    sleep(Duration::from_millis(100)).await;
    let runs = std::fs::read_to_string(&count_file).unwrap();
    assert_eq!(runs.lines().count(), 1);
}
