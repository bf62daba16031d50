//! RTB Daemon - RollerTec garage door bridge
//!
//! This binary supervises the door monitor helper, reconciles its state
//! reports, and serves door characteristics to host clients over a Unix
//! socket.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon (foreground)
//! rtbd start
//!
//! # Start the daemon (background/daemonized)
//! rtbd start -d
//!
//! # Use a specific config file
//! rtbd start --config /etc/rtb/config.toml
//!
//! # Stop the daemon
//! rtbd stop
//!
//! # Check daemon status
//! rtbd status
//!
//! # Override the socket path
//! RTB_SOCKET=/run/rtb.sock rtbd start
//!
//! # Enable debug logging
//! RUST_LOG=rtbd=debug rtbd start
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: graceful shutdown (the monitor helper is stopped
//!   before the process exits)

use std::env;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use rtb_core::{config::DEFAULT_SOCKET_PATH, BridgeConfig};
use rtbd::dispatcher::CommandDispatcher;
use rtbd::door::spawn_door;
use rtbd::sensor::TemperatureSensor;
use rtbd::server::BridgeServer;
use rtbd::supervisor::{MonitorSupervisor, RestartPolicy};

/// RollerTec bridge daemon
#[derive(Parser, Debug)]
#[command(name = "rtbd", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon
    Start {
        /// Run as a background daemon (fork to background)
        #[arg(short = 'd', long)]
        daemon: bool,

        /// Path to the configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Stop the running daemon
    Stop,
    /// Show daemon status
    Status,
}

/// Returns the path to the PID file.
fn pid_file_path() -> PathBuf {
    let state_dir = dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("rtb");
    state_dir.join("rtbd.pid")
}

/// Returns the path to the log file.
fn log_file_path() -> PathBuf {
    let state_dir = dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("rtb");
    state_dir.join("rtb.log")
}

/// Returns the default configuration file path.
fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("/etc"))
        .join("rtb")
        .join("config.toml")
}

/// Reads the PID from the PID file, if it exists.
fn read_pid() -> Option<u32> {
    let path = pid_file_path();
    let mut file = File::open(&path).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

/// Writes the current PID to the PID file.
fn write_pid() -> Result<()> {
    let path = pid_file_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }
    let mut file = File::create(&path).context("Failed to create PID file")?;
    write!(file, "{}", process::id()).context("Failed to write PID")?;
    Ok(())
}

/// Removes the PID file.
fn remove_pid_file() {
    let path = pid_file_path();
    let _ = fs::remove_file(path);
}

/// Checks if a process with the given PID is running.
fn is_process_running(pid: u32) -> bool {
    PathBuf::from(format!("/proc/{pid}")).exists()
}

/// Checks if the daemon is already running.
fn is_daemon_running() -> Option<u32> {
    if let Some(pid) = read_pid() {
        if is_process_running(pid) {
            return Some(pid);
        }
        // Stale PID file - remove it
        remove_pid_file();
    }
    None
}

/// Sends SIGTERM to the daemon process.
fn stop_daemon(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        let result = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
        if result != 0 {
            bail!("Failed to send SIGTERM to process {pid}");
        }
    }
    #[cfg(not(unix))]
    {
        bail!("Stop command is only supported on Unix systems");
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let command = args.command.unwrap_or(Command::Start {
        daemon: false,
        config: None,
    });

    match command {
        Command::Start { daemon, config } => {
            if let Some(pid) = is_daemon_running() {
                eprintln!("Daemon is already running (PID {pid})");
                eprintln!("Use 'rtbd stop' to stop it first.");
                process::exit(1);
            }

            if daemon {
                daemonize()?;
            }

            write_pid()?;

            let result = run_daemon(config);

            remove_pid_file();

            result
        }
        Command::Stop => {
            if let Some(pid) = is_daemon_running() {
                println!("Stopping daemon (PID {pid})...");
                stop_daemon(pid)?;

                // Wait for process to exit (up to 10 seconds; the monitor
                // helper gets its own grace period first)
                for _ in 0..100 {
                    if !is_process_running(pid) {
                        println!("Daemon stopped.");
                        return Ok(());
                    }
                    std::thread::sleep(std::time::Duration::from_millis(100));
                }

                eprintln!("Daemon did not stop within 10 seconds.");
                process::exit(1);
            } else {
                println!("Daemon is not running.");
                Ok(())
            }
        }
        Command::Status => {
            if let Some(pid) = is_daemon_running() {
                println!("Daemon is running (PID {pid})");

                let socket_path =
                    env::var("RTB_SOCKET").unwrap_or_else(|_| DEFAULT_SOCKET_PATH.to_string());
                if PathBuf::from(&socket_path).exists() {
                    println!("Socket: {socket_path}");
                }

                Ok(())
            } else {
                println!("Daemon is not running.");
                process::exit(1);
            }
        }
    }
}

/// Daemonizes the current process.
fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let log_path = log_file_path();

    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    let stdout = File::create(&log_path).context("Failed to create log file for stdout")?;
    let stderr = File::create(&log_path).context("Failed to create log file for stderr")?;

    let daemonize = Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr);

    daemonize.start().context("Failed to daemonize")?;

    Ok(())
}

/// Runs the daemon (async entry point).
#[tokio::main]
async fn run_daemon(config_arg: Option<PathBuf>) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("rtbd=info".parse()?)
                .add_directive("rtb_core=info".parse()?)
                .add_directive("rtb_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "bridge daemon starting"
    );

    let config_path = config_arg
        .or_else(|| env::var_os("RTB_CONFIG").map(PathBuf::from))
        .unwrap_or_else(default_config_path);
    let config = BridgeConfig::load_or_default(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let socket_path = env::var("RTB_SOCKET")
        .map(PathBuf::from)
        .unwrap_or_else(|_| config.socket_path.clone());

    let cancel_token = CancellationToken::new();

    // Setup signal handlers
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "error waiting for shutdown signal");
        }
        info!("shutdown signal received");
        shutdown_token.cancel();
    });

    // Spawn the door state actor
    let door = spawn_door(config.accessory(), config.ignore_errors);
    info!(ignore_errors = config.ignore_errors, "door actor started");

    // Locate the temperature sensor (if fitted)
    let sensor = TemperatureSensor::detect(&config.sensor).await;

    let dispatcher = CommandDispatcher::new(&config, door.clone());

    // Supervise the monitor helper
    let supervisor = MonitorSupervisor::new(
        config.monitor_path(),
        door.clone(),
        RestartPolicy::default(),
        cancel_token.clone(),
    );
    let mut supervisor_task = tokio::spawn(supervisor.run());

    let server = BridgeServer::new(
        &socket_path,
        door,
        dispatcher,
        sensor,
        config.accessory(),
        cancel_token.clone(),
    );
    info!(socket = %socket_path.display(), "starting server");
    let mut server_task = tokio::spawn(async move { server.run().await });

    let mut failure: Option<anyhow::Error> = None;

    tokio::select! {
        res = &mut supervisor_task => {
            // Helper fatal error, restart exhaustion, or shutdown race.
            cancel_token.cancel();
            match res {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(error = %e, "door monitor failure is fatal");
                    failure = Some(e.into());
                }
                Err(e) => failure = Some(anyhow::anyhow!("supervisor task failed: {e}")),
            }
            let _ = (&mut server_task).await;
        }
        res = &mut server_task => {
            cancel_token.cancel();
            match res {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(error = %e, "server error");
                    failure = Some(e.into());
                }
                Err(e) => failure = Some(anyhow::anyhow!("server task failed: {e}")),
            }
            // Wait for the monitor helper teardown before exiting.
            match (&mut supervisor_task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(error = %e, "door monitor failure during shutdown");
                    if failure.is_none() {
                        failure = Some(e.into());
                    }
                }
                Err(e) => {
                    if failure.is_none() {
                        failure = Some(anyhow::anyhow!("supervisor task failed: {e}"));
                    }
                }
            }
        }
    }

    match failure {
        Some(e) => Err(e),
        None => {
            info!("bridge daemon stopped");
            Ok(())
        }
    }
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("received Ctrl+C");
    }

    Ok(())
}
