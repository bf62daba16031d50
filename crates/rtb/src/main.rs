//! RTB - command line client for the RollerTec bridge daemon
//!
//! # Usage
//!
//! ```bash
//! # Show the current door state
//! rtb status
//!
//! # Request a door movement
//! rtb open
//! rtb close
//!
//! # Read the temperature sensor
//! rtb temp
//!
//! # Stream state changes as they happen
//! rtb watch
//!
//! # Talk to a daemon on a non-default socket
//! rtb --socket /run/rtb.sock status
//! ```

use std::env;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use rtb::DaemonClient;
use rtb_core::{config::DEFAULT_SOCKET_PATH, DoorView, TargetState};

/// RollerTec bridge client
#[derive(Parser, Debug)]
#[command(name = "rtb", version, about)]
struct Args {
    /// Path to the daemon socket (defaults to $RTB_SOCKET or the
    /// built-in default)
    #[arg(long)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the current door state
    Status,
    /// Request the door to open
    Open,
    /// Request the door to close
    Close,
    /// Read the temperature sensor
    Temp,
    /// Stream state changes as they happen
    Watch,
}

fn socket_path(args: &Args) -> PathBuf {
    args.socket.clone().unwrap_or_else(|| {
        env::var("RTB_SOCKET")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_SOCKET_PATH))
    })
}

fn print_view(view: &DoorView) {
    let obstruction = if view.obstruction {
        " [obstruction detected]"
    } else {
        ""
    };
    println!(
        "{}: {} (target {}){}",
        view.name, view.current_state, view.target_state, obstruction
    );
    println!(
        "  monitor: {}  updated: {}",
        view.monitor_health,
        view.updated_at.to_rfc3339()
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let socket = socket_path(&args);

    let mut client = DaemonClient::connect(&socket).await?;

    match args.command {
        Command::Status => {
            let view = client.get_state().await?;
            print_view(&view);
        }
        Command::Open => {
            let view = client.set_target(TargetState::Open).await?;
            println!("open requested");
            print_view(&view);
        }
        Command::Close => {
            let view = client.set_target(TargetState::Closed).await?;
            println!("close requested");
            print_view(&view);
        }
        Command::Temp => {
            let celsius = client.get_temperature().await?;
            println!("{celsius:.1} C");
        }
        Command::Watch => {
            client.watch(|view| print_view(view)).await?;
        }
    }

    Ok(())
}
