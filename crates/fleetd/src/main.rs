//! fleetd — the fleet daemon.
//!
//! Assembles the fleet subsystems in one process:
//! - Compute and remote-shell backends
//! - Worker store and lifecycle (launch, retention, preemption, termination)
//! - Controller registry and the provisioning strategy
//! - Demand-driven provisioning loop
//! - Orphan reconciliation sweep
//!
//! # Usage
//!
//! ```text
//! fleetd run --config /etc/fleet/fleet.toml
//! fleetd check-config --config /etc/fleet/fleet.toml --remote
//! ```

mod check;
mod daemon;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,fleetd=debug,fleet=debug";

#[derive(Parser)]
#[command(name = "fleetd", about = "CI worker fleet daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon until Ctrl-C.
    Run {
        /// Path to fleet.toml.
        #[arg(long, default_value = "fleet.toml")]
        config: PathBuf,

        /// Emit logs as JSON lines.
        #[arg(long)]
        json_logs: bool,
    },
    /// Validate fleet.toml and print a summary.
    CheckConfig {
        /// Path to fleet.toml.
        #[arg(long, default_value = "fleet.toml")]
        config: PathBuf,

        /// Also check zones, machine types and networks against the
        /// compute backend.
        #[arg(long)]
        remote: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run { config, json_logs } => {
            init_tracing(json_logs);
            daemon::run(&config).await
        }
        Command::CheckConfig { config, remote } => {
            init_tracing(false);
            check::check_config(&config, remote).await
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
