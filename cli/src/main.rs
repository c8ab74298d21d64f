// Copyright (c) 2026 AOL Contributors
// SPDX-License-Identifier: AGPL-3.0

//! # AOL CLI
//!
//! The `aol` binary runs the Agent Orchestration Layer core and manages
//! services, manifests and workflows against it.
//!
//! ## Commands
//!
//! - `aol serve` - Run the core (registry, router, health manager, gateway and monitoring APIs)
//! - `aol config show|validate|generate` - Configuration management
//! - `aol manifest validate|graph` - Manifest tooling
//! - `aol service create` - Scaffold a service from a template
//! - `aol services list` - List services registered with a running core
//! - `aol workflow validate|run` - Workflow tooling

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing::info;

use aol::commands::{
    self, ConfigCommand, ManifestCommand, ServiceCommand, ServicesCommand, WorkflowCommand,
};
use aol::daemon::{self, DEFAULT_CORE_URL};
use aol_core::domain::config::AolConfig;

/// AOL - Agent Orchestration Layer
#[derive(Parser)]
#[command(name = "aol")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "AOL_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); defaults to the config's level
    #[arg(long, global = true, env = "AOL_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (text, json); defaults to the config's format
    #[arg(long, global = true, env = "AOL_LOG_FORMAT")]
    log_format: Option<String>,

    /// Monitoring API of the core to talk to
    #[arg(long, global = true, env = "AOL_CORE_URL", default_value = DEFAULT_CORE_URL)]
    core_url: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the core server
    #[command(name = "serve")]
    Serve,

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Manifest tooling
    #[command(name = "manifest")]
    Manifest {
        #[command(subcommand)]
        command: ManifestCommand,
    },

    /// Service scaffolding
    #[command(name = "service")]
    Service {
        #[command(subcommand)]
        command: ServiceCommand,
    },

    /// Registered services on a running core
    #[command(name = "services")]
    Services {
        #[command(subcommand)]
        command: ServicesCommand,
    },

    /// Workflow management
    #[command(name = "workflow")]
    Workflow {
        #[command(subcommand)]
        command: WorkflowCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Logging settings from the config file apply unless overridden
    let file_config = AolConfig::load_or_default(cli.config.clone()).ok();
    let level = cli
        .log_level
        .clone()
        .or_else(|| file_config.as_ref().map(|c| c.spec.logging.level.clone()))
        .unwrap_or_else(|| "info".to_string());
    let format = cli
        .log_format
        .clone()
        .or_else(|| file_config.as_ref().map(|c| c.spec.logging.format.clone()))
        .unwrap_or_else(|| "text".to_string());
    init_logging(&level, &format)?;

    match cli.command {
        Some(Commands::Serve) => {
            let config = AolConfig::load_or_default(cli.config)
                .context("Failed to load configuration")?;
            info!("Starting AOL core");
            daemon::start_server(config).await
        }
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config).await
        }
        Some(Commands::Manifest { command }) => commands::manifest::handle_command(command).await,
        Some(Commands::Service { command }) => commands::service::handle_command(command).await,
        Some(Commands::Services { command }) => {
            commands::services::handle_command(command, &cli.core_url).await
        }
        Some(Commands::Workflow { command }) => {
            commands::workflow::handle_command(command, &cli.core_url).await
        }
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, format: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.compact().init();
    }

    Ok(())
}
