//! Integration tests for the Unix socket server.
//!
//! These tests verify the BridgeServer as a complete system: handshake
//! and version negotiation, state queries, subscription pushes driven by
//! monitor reports, command dispatch, and error replies.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use rtb_core::{BridgeConfig, TargetState};
use rtb_protocol::{ClientMessage, DaemonMessage, ProtocolVersion, RequestType};
use rtbd::dispatcher::CommandDispatcher;
use rtbd::door::{spawn_door, DoorHandle};
use rtbd::sensor::TemperatureSensor;
use rtbd::server::BridgeServer;

/// Maximum time to wait for the server socket to appear
const SOCKET_WAIT_TIMEOUT: Duration = Duration::from_millis(500);

/// Interval between socket existence checks
const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Maximum time to wait for a reply line
const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// Test Helpers
// ============================================================================

/// Test bridge context that manages server lifecycle and cleanup.
struct TestBridge {
    socket_path: PathBuf,
    door: DoorHandle,
    cancel_token: CancellationToken,
    _temp_dir: TempDir, // Keep alive for RAII cleanup
}

impl TestBridge {
    /// Spawns a bridge whose open/close scripts have the given bodies.
    async fn spawn_with_scripts(open_body: &str, close_body: &str) -> Self {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        write_script(temp_dir.path(), "open.sh", open_body);
        write_script(temp_dir.path(), "close.sh", close_body);

        let config = BridgeConfig {
            script_dir: temp_dir.path().to_path_buf(),
            open_command: PathBuf::from("open.sh"),
            close_command: PathBuf::from("close.sh"),
            status_file: temp_dir.path().join("status"),
            ..BridgeConfig::default()
        };

        let socket_path = temp_dir.path().join("test.sock");
        let door = spawn_door(config.accessory(), config.ignore_errors);
        let dispatcher = CommandDispatcher::new(&config, door.clone());
        let cancel_token = CancellationToken::new();

        let server = BridgeServer::new(
            socket_path.clone(),
            door.clone(),
            dispatcher,
            TemperatureSensor::unconfigured(),
            config.accessory(),
            cancel_token.clone(),
        );

        tokio::spawn(async move {
            let _ = server.run().await;
        });

        // Wait for the socket with a bounded poll.
        let start = tokio::time::Instant::now();
        while start.elapsed() < SOCKET_WAIT_TIMEOUT {
            if socket_path.exists() {
                break;
            }
            sleep(SOCKET_POLL_INTERVAL).await;
        }
        assert!(
            socket_path.exists(),
            "server socket did not appear within {SOCKET_WAIT_TIMEOUT:?}"
        );

        Self {
            socket_path,
            door,
            cancel_token,
            _temp_dir: temp_dir,
        }
    }

    async fn spawn() -> Self {
        Self::spawn_with_scripts("echo OPENING", "echo CLOSING").await
    }
}

impl Drop for TestBridge {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

fn write_script(dir: &Path, name: &str, body: &str) {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
}

struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    async fn connect(bridge: &TestBridge) -> Self {
        let stream = UnixStream::connect(&bridge.socket_path)
            .await
            .expect("connect to bridge socket");
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    /// Connects and performs the handshake, returning the reply.
    async fn handshake(bridge: &TestBridge) -> (Self, DaemonMessage) {
        let mut client = Self::connect(bridge).await;
        client.send(&ClientMessage::connect(None)).await;
        let reply = client.recv().await;
        (client, reply)
    }

    async fn send(&mut self, msg: &ClientMessage) {
        let json = serde_json::to_string(msg).unwrap();
        self.writer.write_all(json.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.writer.flush().await.unwrap();
    }

    async fn send_raw(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.writer.flush().await.unwrap();
    }

    async fn recv(&mut self) -> DaemonMessage {
        let mut line = String::new();
        let read = timeout(REPLY_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for reply")
            .expect("read reply");
        assert!(read > 0, "connection closed");
        serde_json::from_str(&line).expect("parse daemon message")
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_handshake_reports_accessory_info() {
    let bridge = TestBridge::spawn().await;
    let (_client, reply) = TestClient::handshake(&bridge).await;

    match reply {
        DaemonMessage::Connected {
            protocol_version,
            client_id,
            accessory,
        } => {
            assert!(protocol_version.is_compatible_with(&ProtocolVersion::CURRENT));
            assert!(!client_id.is_empty());
            assert_eq!(accessory.manufacturer, "Lo-tech");
            assert_eq!(accessory.model, "PDT RollerTec");
            assert_eq!(accessory.name, "Garage Door");
        }
        other => panic!("expected connected, got {other:?}"),
    }
}

#[tokio::test]
async fn test_incompatible_version_is_rejected() {
    let bridge = TestBridge::spawn().await;
    let mut client = TestClient::connect(&bridge).await;

    let msg = ClientMessage {
        protocol_version: ProtocolVersion::new(2, 0),
        request: RequestType::Connect { client_id: None },
    };
    client.send(&msg).await;

    match client.recv().await {
        DaemonMessage::Rejected { reason, .. } => {
            assert!(reason.contains("not compatible"));
        }
        other => panic!("expected rejected, got {other:?}"),
    }
}

#[tokio::test]
async fn test_request_before_connect_fails_handshake() {
    let bridge = TestBridge::spawn().await;
    let mut client = TestClient::connect(&bridge).await;

    client.send(&ClientMessage::get_state()).await;

    match client.recv().await {
        DaemonMessage::Error { message, .. } => {
            assert!(message.contains("connect"));
        }
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_get_state_returns_initial_assumption() {
    let bridge = TestBridge::spawn().await;
    let (mut client, _) = TestClient::handshake(&bridge).await;

    client.send(&ClientMessage::get_state()).await;
    match client.recv().await {
        DaemonMessage::State { view } => {
            assert_eq!(view.current_state.code(), 1);
            assert_eq!(view.target_state.code(), 1);
            assert!(!view.obstruction);
        }
        other => panic!("expected state, got {other:?}"),
    }
}

#[tokio::test]
async fn test_report_sequence_is_visible_to_clients() {
    let bridge = TestBridge::spawn().await;
    let (mut client, _) = TestClient::handshake(&bridge).await;

    bridge.door.report("OPENING".to_string()).await.unwrap();
    client.send(&ClientMessage::get_state()).await;
    match client.recv().await {
        DaemonMessage::State { view } => {
            assert_eq!(view.current_state.code(), 2);
            assert_eq!(view.target_state.code(), 0);
        }
        other => panic!("expected state, got {other:?}"),
    }

    bridge.door.report("OPEN".to_string()).await.unwrap();
    client.send(&ClientMessage::get_state()).await;
    match client.recv().await {
        DaemonMessage::State { view } => {
            assert_eq!(view.current_state.code(), 0);
            assert_eq!(view.target_state.code(), 0);
        }
        other => panic!("expected state, got {other:?}"),
    }
}

#[tokio::test]
async fn test_subscribers_receive_pushed_changes() {
    let bridge = TestBridge::spawn().await;
    let (mut client, _) = TestClient::handshake(&bridge).await;

    client.send(&ClientMessage::subscribe()).await;
    // Initial state arrives as a direct reply.
    assert!(matches!(client.recv().await, DaemonMessage::State { .. }));

    bridge.door.report("CLOSING".to_string()).await.unwrap();
    match client.recv().await {
        DaemonMessage::StateChanged { view } => {
            assert_eq!(view.current_state.code(), 3);
            assert_eq!(view.target_state.code(), 1);
            assert!(!view.obstruction);
        }
        other => panic!("expected state_changed, got {other:?}"),
    }

    bridge.door.report("STOPPED".to_string()).await.unwrap();
    match client.recv().await {
        DaemonMessage::StateChanged { view } => {
            assert_eq!(view.current_state.code(), 4);
            assert_eq!(view.target_state.code(), 1);
            assert!(view.obstruction);
        }
        other => panic!("expected state_changed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_set_target_records_intent_and_replies_state() {
    let bridge = TestBridge::spawn().await;
    let (mut client, _) = TestClient::handshake(&bridge).await;

    client
        .send(&ClientMessage::set_target(TargetState::Open))
        .await;
    match client.recv().await {
        DaemonMessage::State { view } => {
            assert_eq!(view.target_state.code(), 0);
            // The monitor has not confirmed anything yet.
            assert_eq!(view.current_state.code(), 1);
        }
        other => panic!("expected state, got {other:?}"),
    }
}

#[tokio::test]
async fn test_failed_command_surfaces_error_but_keeps_intent() {
    let bridge =
        TestBridge::spawn_with_scripts("echo OPENING", "echo relay stuck >&2; exit 3").await;
    let (mut client, _) = TestClient::handshake(&bridge).await;

    client
        .send(&ClientMessage::set_target(TargetState::Closed))
        .await;
    match client.recv().await {
        DaemonMessage::Error { message, code } => {
            assert_eq!(code.as_deref(), Some("command_failed"));
            assert!(message.contains("relay stuck"));
        }
        other => panic!("expected error, got {other:?}"),
    }

    // The optimistic target write still happened.
    client.send(&ClientMessage::get_state()).await;
    match client.recv().await {
        DaemonMessage::State { view } => {
            assert_eq!(view.target_state.code(), 1);
        }
        other => panic!("expected state, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unconfigured_sensor_reads_zero() {
    let bridge = TestBridge::spawn().await;
    let (mut client, _) = TestClient::handshake(&bridge).await;

    client.send(&ClientMessage::get_temperature()).await;
    match client.recv().await {
        DaemonMessage::Temperature { celsius } => assert_eq!(celsius, 0.0),
        other => panic!("expected temperature, got {other:?}"),
    }
}

#[tokio::test]
async fn test_malformed_request_does_not_drop_connection() {
    let bridge = TestBridge::spawn().await;
    let (mut client, _) = TestClient::handshake(&bridge).await;

    client.send_raw("this is not json").await;
    match client.recv().await {
        DaemonMessage::Error { code, .. } => {
            assert_eq!(code.as_deref(), Some("bad_request"));
        }
        other => panic!("expected error, got {other:?}"),
    }

    // The connection survives the garbled line.
    client.send(&ClientMessage::ping(42)).await;
    match client.recv().await {
        DaemonMessage::Pong { seq } => assert_eq!(seq, 42),
        other => panic!("expected pong, got {other:?}"),
    }
}

#[tokio::test]
async fn test_ping_pong() {
    let bridge = TestBridge::spawn().await;
    let (mut client, _) = TestClient::handshake(&bridge).await;

    client.send(&ClientMessage::ping(7)).await;
    match client.recv().await {
        DaemonMessage::Pong { seq } => assert_eq!(seq, 7),
        other => panic!("expected pong, got {other:?}"),
    }
}
