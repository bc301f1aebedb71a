// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # fleetctl
//!
//! Front-end for the fleet renewal engine.
//!
//! ## Commands
//!
//! - `fleetctl serve` - Run the HTTP API over in-memory stores loaded from a seed file
//! - `fleetctl config show|validate|generate` - Configuration management
//! - `fleetctl status --expiry <DATE>` - Resolve a device status offline

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing::info;

use fleet_renewal::commands::{self, ConfigCommand, StatusArgs};
use fleet_renewal::server;

/// Fleet renewal engine
#[derive(Parser)]
#[command(name = "fleetctl")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Renewal manifest to load instead of searching for one
    #[arg(
        short,
        long,
        global = true,
        env = "FLEET_RENEWAL_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// HTTP API port (overrides spec.api.port)
    #[arg(long, global = true, env = "FLEET_RENEWAL_PORT")]
    port: Option<u16>,

    /// HTTP API host (overrides spec.api.bind_address)
    #[arg(long, global = true, env = "FLEET_RENEWAL_HOST")]
    host: Option<String>,

    /// Default tracing filter when RUST_LOG is unset
    #[arg(long, global = true, env = "FLEET_RENEWAL_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API
    #[command(name = "serve")]
    Serve {
        /// Fleet seed file (overrides spec.seed_path)
        #[arg(long, value_name = "FILE")]
        seed: Option<PathBuf>,
    },

    /// Inspect or scaffold the renewal manifest
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Resolve a device status from its dates
    #[command(name = "status")]
    Status(StatusArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    match cli.command {
        Some(Commands::Serve { seed }) => {
            info!("Starting fleet renewal API");
            server::serve(server::ServeOptions {
                config_path: cli.config,
                seed_path: seed,
                host: cli.host,
                port: cli.port,
            })
            .await
        }
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config).await
        }
        Some(Commands::Status(args)) => commands::status::handle_command(args),
        None => {
            eprintln!("{}", "fleetctl needs a subcommand; see --help".yellow());
            std::process::exit(1);
        }
    }
}

/// RUST_LOG takes precedence over `--log-level`.
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .with_context(|| format!("bad log filter {:?}", level))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}
