//! rearlink CLI
//!
//! Connects to the privilege broker over its Unix socket, asks for the grant
//! a subcommand needs, runs it, and releases the session.

use std::io;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use rearlink_bridge::PermissionBridge;
use rearlink_bridge::display::{RearDisplay, ReturnTarget};
use rearlink_cli::bridge_cmd;
use rearlink_cli::display_cmd::{self, DpiAction};
use rearlink_core::config::{Config, load_config};
use rearlink_core::tracing_init::init_tracing;

#[derive(Parser, Debug)]
#[command(name = "rearlink")]
#[command(version, about = "Rear display control through the privilege broker", long_about = None)]
struct Cli {
    /// Broker socket path
    #[arg(long, env = "REARLINK_SOCKET")]
    socket: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show broker reachability and session details
    Status,
    /// Request a grant for an operation
    Grant {
        /// Operation id, e.g. toggle-display
        operation: String,
    },
    /// Invoke an operation through the broker
    Invoke {
        /// Operation id, e.g. toggle-display
        operation: String,
        /// JSON payload for the operation
        #[arg(long)]
        payload: Option<String>,
    },
    /// Show rear display geometry
    DisplayInfo {
        /// Display id (defaults to the configured rear display)
        #[arg(long)]
        display: Option<u32>,
    },
    /// Show, set or reset the rear display density
    Dpi {
        /// New density in dpi
        value: Option<u32>,
        /// Restore the physical density
        #[arg(long, conflicts_with = "value")]
        reset: bool,
    },
    /// Show or lock display rotation
    Rotation {
        /// Display id (defaults to the configured rear display)
        #[arg(long)]
        display: Option<u32>,
        /// Quarter turns: 0, 1, 2 or 3
        value: Option<u8>,
    },
    /// Move the front app onto the rear display
    Switch,
    /// Send a task on the rear display back to the main display
    Return {
        /// Task id to return (defaults to the rear display's top task)
        #[arg(long, conflicts_with = "package")]
        task: Option<i32>,
        /// Return the top task only if it belongs to this package
        #[arg(long)]
        package: Option<String>,
    },
    /// Collapse the status bar, or pin it to the main display
    StatusBar {
        #[arg(long)]
        to_main: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let project_dir = std::env::current_dir().ok();
    let mut config = load_config(project_dir.as_deref())?;
    if let Some(socket) = cli.socket {
        config.broker.socket_path = Some(socket);
    }

    init_tracing(&format!("rearlink={}", config.log_level), cli.log_json);
    info!(version = env!("CARGO_PKG_VERSION"), "Starting rearlink CLI");

    let bridge = PermissionBridge::unix(&config.broker);
    let mut out = io::stdout();

    if matches!(cli.command, Commands::Status) {
        let socket = config.broker.resolved_socket_path();
        return bridge_cmd::status(&bridge, &socket, &mut out).await;
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                debug!("Interrupted");
                cancel.cancel();
            }
        });
    }

    bridge.connect().await?;
    let result = tokio::select! {
        biased;
        () = cancel.cancelled() => Err(anyhow::anyhow!("interrupted")),
        result = run(&bridge, cli.command, &config, &cancel, &mut out) => result,
    };
    bridge.disconnect().await;
    result
}

async fn run(
    bridge: &PermissionBridge,
    command: Commands,
    config: &Config,
    cancel: &CancellationToken,
    out: &mut impl io::Write,
) -> anyhow::Result<()> {
    let rear = config.display.rear_display_id;
    match command {
        Commands::Status => Ok(()),
        Commands::Grant { operation } => bridge_cmd::grant(bridge, &operation, cancel, out).await,
        Commands::Invoke { operation, payload } => {
            bridge_cmd::invoke(bridge, &operation, payload.as_deref(), cancel, out).await
        }
        Commands::DisplayInfo { display } => {
            display_cmd::info(&RearDisplay::new(bridge, display.unwrap_or(rear)), out).await
        }
        Commands::Dpi { value, reset } => {
            let action = match (value, reset) {
                (_, true) => DpiAction::Reset,
                (Some(dpi), false) => DpiAction::Set(dpi),
                (None, false) => DpiAction::Show,
            };
            display_cmd::dpi(&RearDisplay::new(bridge, rear), action, out).await
        }
        Commands::Rotation { display, value } => {
            display_cmd::rotation(&RearDisplay::new(bridge, display.unwrap_or(rear)), value, out)
                .await
        }
        Commands::Switch => display_cmd::switch(&RearDisplay::new(bridge, rear), out).await,
        Commands::Return { task, package } => {
            let target = match (task, package) {
                (Some(task_id), _) => ReturnTarget::Task(task_id),
                (None, Some(package)) => ReturnTarget::Package(package),
                (None, None) => ReturnTarget::Current,
            };
            display_cmd::return_task(&RearDisplay::new(bridge, rear), target, out).await
        }
        Commands::StatusBar { to_main } => {
            display_cmd::status_bar(&RearDisplay::new(bridge, rear), to_main, out).await
        }
    }
}
