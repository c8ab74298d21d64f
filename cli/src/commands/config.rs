// Copyright (c) 2026 AOL Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::{Path, PathBuf};

use aol_core::domain::config::AolConfig;

pub const MINIMAL_TEMPLATE: &str = include_str!("../../templates/aol-config-minimal.yaml");
pub const EXAMPLES_TEMPLATE: &str = include_str!("../../templates/aol-config-with-examples.yaml");

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path
        #[arg(short, long, default_value = "./aol-config.yaml")]
        output: PathBuf,

        /// Include every section with comments
        #[arg(long)]
        examples: bool,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub async fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate {
            output,
            examples,
            force,
        } => generate(&output, examples, force),
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = AolConfig::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. AOL_CONFIG_PATH: {}",
            std::env::var("AOL_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./aol-config.yaml");
        println!("  4. ~/.aol/config.yaml");
        println!("  5. /etc/aol/config.yaml");
        println!();
    }

    let spec = &config.spec;
    println!("{}", "Current configuration:".bold());
    println!();
    println!("  Name:            {}", config.metadata.name);
    println!("  Gateway:         {}:{}", spec.gateway.host, spec.gateway.port);
    println!("  Monitoring API:  {}", config.health_bind_address());
    println!(
        "  Metrics:         {}",
        if spec.monitoring.metrics_enabled { "enabled" } else { "disabled" }
    );
    println!(
        "  Health checks:   every {:?}",
        spec.registry.health_check_interval
    );
    println!();

    println!("{}", "Consul:".bold());
    if spec.consul.enabled {
        println!("  Address: {}:{}", spec.consul.host, spec.consul.port);
    } else {
        println!("  {}", "disabled".dimmed());
    }
    println!();

    let hm = &spec.health_management;
    println!("{}", "Health Management:".bold());
    println!("  Auto recovery:      {}", hm.auto_recovery_enabled);
    println!("  Lazy detection:     {}", hm.lazy_detection_enabled);
    println!("  Lazy threshold:     {}", hm.lazy_threshold);
    println!("  Window size:        {}", hm.window_size);
    println!("  Max restarts/hour:  {}", hm.max_restarts_per_hour);
    println!("  Restart cooldown:   {:?}", hm.restart_cooldown);
    println!();

    println!("{}", "Router:".bold());
    println!("  Workers:         {}", spec.router.workers);
    println!("  Queue capacity:  {}", spec.router.queue_capacity);
    println!("  Request timeout: {:?}", spec.router.request_timeout);
    println!("  Max retries:     {}", spec.router.max_retries);
    println!();

    println!("{}", "Event Store:".bold());
    println!("  Max events: {}", spec.event_store.max_events);

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = AolConfig::load_or_default(config_path).context("Failed to load configuration")?;

    config.validate().context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

pub fn generate(output: &Path, with_examples: bool, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            output.display()
        );
    }

    let sample = if with_examples {
        EXAMPLES_TEMPLATE
    } else {
        MINIMAL_TEMPLATE
    };

    std::fs::write(output, sample)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}
