//! API gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────────────────┐
//!                      │                       API GATEWAY                        │
//!                      │                                                          │
//!   Client Request     │  ┌─────────┐   ┌──────────┐   ┌────────────────────┐     │
//!   ───────────────────┼─▶│  http   │──▶│ routing  │──▶│ security           │     │
//!                      │  │ server  │   │ registry │   │ admission control  │     │
//!                      │  └─────────┘   └──────────┘   └─────────┬──────────┘     │
//!                      │                                         │ admitted       │
//!                      │                                         ▼                │
//!                      │                               ┌────────────────────┐     │
//!                      │                               │ load_balancer      │     │
//!                      │                               │ sticky + failover  │     │
//!                      │                               └─────────┬──────────┘     │
//!                      │                                         │                │
//!   Client Response    │                                         ▼                │
//!   ◀──────────────────┼──────────────────────────────── upstream response ◀──────┼── Backend
//!                      │                                                          │
//!                      │  store (sessions, counters) · policy oracle · events     │
//!                      │  config + hot reload · observability · lifecycle         │
//!                      └──────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use api_gateway::config::load_config;
use api_gateway::lifecycle::{signals, startup, Shutdown};

#[derive(Parser, Debug)]
#[command(name = "api-gateway", version)]
#[command(about = "Sticky, failover-aware API gateway with admission control", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Validate the configuration and exit.
    #[arg(long, requires = "config")]
    check: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.check {
        return check(cli.config.as_deref());
    }

    let shutdown = Shutdown::new();
    signals::spawn_signal_handler(shutdown.clone());

    match startup::run(cli.config, shutdown).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Gateway failed");
            eprintln!("api-gateway: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn check(path: Option<&std::path::Path>) -> ExitCode {
    let Some(path) = path else {
        eprintln!("--check requires --config");
        return ExitCode::FAILURE;
    };
    match load_config(path) {
        Ok(config) => {
            println!("{}: OK ({} services)", path.display(), config.services.len());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}: {}", path.display(), e);
            ExitCode::FAILURE
        }
    }
}
