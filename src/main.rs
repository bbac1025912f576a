//! Bluelink - Bluetooth discovery, pairing and auto-reconnect
//!
//! This is the binary entry point. All logic lives in the library.

use std::path::PathBuf;

use bluelink::ClientCommand;
use bluelink_app::load_settings;
use clap::{Parser, Subcommand};

/// Bluelink - Bluetooth discovery, pairing and auto-reconnect
#[derive(Parser, Debug)]
#[command(name = "bluelink")]
#[command(about = "Keeps known Bluetooth devices connected", long_about = None)]
struct Args {
    /// Path to a config file (defaults to ~/.config/bluelink/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the discovery loop in the foreground
    Daemon,
    /// Show the shared state
    Status,
    /// List devices, optionally filtered by class
    List {
        /// paired, trusted, bonded or connected
        #[arg(long)]
        class: Option<String>,
    },
    /// Pair and trust a device
    Pair(Target),
    /// Remove a device
    Unpair(Target),
    /// Connect a device (pairs it first when needed)
    Connect(Target),
    /// Disconnect a device and stop reconnecting it
    Disconnect(Target),
    /// Tear down the shared state, stopping a running daemon
    Stop,
}

#[derive(clap::Args, Debug)]
struct Target {
    /// Hardware address, e.g. AA:BB:CC:DD:EE:FF
    address: String,

    /// Name used in log lines
    #[arg(long)]
    name: Option<String>,
}

impl Command {
    fn role(&self) -> &'static str {
        match self {
            Command::Daemon => "daemon",
            _ => "client",
        }
    }

    fn into_client(self) -> Option<ClientCommand> {
        Some(match self {
            Command::List { class } => ClientCommand::List { class },
            Command::Pair(t) => ClientCommand::Pair {
                address: t.address,
                name: t.name,
            },
            Command::Unpair(t) => ClientCommand::Unpair {
                address: t.address,
                name: t.name,
            },
            Command::Connect(t) => ClientCommand::Connect {
                address: t.address,
                name: t.name,
            },
            Command::Disconnect(t) => ClientCommand::Disconnect {
                address: t.address,
                name: t.name,
            },
            Command::Daemon | Command::Status | Command::Stop => return None,
        })
    }
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    let args = Args::parse();

    color_eyre::install()?;
    bluelink_core::logging::init(args.command.role())?;

    let settings = load_settings(args.config.as_deref());

    let succeeded = match args.command {
        Command::Daemon => bluelink::run_daemon(&settings).await?,
        Command::Status => bluelink::run_status(&settings)?,
        Command::Stop => bluelink::run_stop(&settings)?,
        command => match command.into_client() {
            Some(client) => bluelink::run_client(&settings, &client).await?,
            None => false,
        },
    };

    if !succeeded {
        std::process::exit(1);
    }
    Ok(())
}
