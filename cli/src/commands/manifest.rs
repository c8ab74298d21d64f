// Copyright (c) 2026 AOL Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Manifest commands
//!
//! - `aol manifest validate <FILE> [--strict] [--config FILE]`
//! - `aol manifest graph <FILE>`

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use serde_json::Value;
use std::path::{Path, PathBuf};

use aol_core::domain::manifest::{ConfigValidator, ManifestValidator, ValidationResult, ValidationSeverity};
use aol_core::domain::workflow::WorkflowGraph;

#[derive(Subcommand)]
pub enum ManifestCommand {
    /// Validate a service manifest
    Validate {
        #[arg(value_name = "FILE", default_value = "manifest.yaml")]
        file: PathBuf,

        /// Report unknown fields as warnings
        #[arg(long)]
        strict: bool,

        /// Also validate the service's config.yaml
        #[arg(long = "service-config", value_name = "FILE")]
        service_config: Option<PathBuf>,
    },

    /// Show the workflow graph derived from a manifest's data requirements
    Graph {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

pub async fn handle_command(command: ManifestCommand) -> Result<()> {
    match command {
        ManifestCommand::Validate {
            file,
            strict,
            service_config,
        } => validate(&file, strict, service_config.as_deref()),
        ManifestCommand::Graph { file } => graph(&file),
    }
}

fn print_result(label: &str, result: &ValidationResult) {
    println!("{} {}", label.bold(), if result.valid { "✓ valid".green() } else { "✗ invalid".red() });
    for issue in &result.issues {
        let line = issue.to_string();
        let colored = match issue.severity {
            ValidationSeverity::Error => line.red(),
            ValidationSeverity::Warning => line.yellow(),
            ValidationSeverity::Info => line.dimmed(),
        };
        println!("  {}", colored);
        if let Some(suggestion) = &issue.suggestion {
            println!("    → {}", suggestion.dimmed());
        }
    }
}

fn validate(file: &Path, strict: bool, service_config: Option<&Path>) -> Result<()> {
    let manifest = ManifestValidator::new(strict).validate_file(file);
    print_result(&format!("Manifest {}:", file.display()), &manifest);

    let mut valid = manifest.valid;
    if let Some(config_path) = service_config {
        let config = ConfigValidator.validate_file(config_path);
        print_result(&format!("Config {}:", config_path.display()), &config);
        valid &= config.valid;
    }

    if !valid {
        anyhow::bail!("Validation failed");
    }
    Ok(())
}

pub fn load_manifest(file: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read manifest {}", file.display()))?;
    serde_yaml::from_str(&content).with_context(|| format!("Invalid YAML in {}", file.display()))
}

fn graph(file: &Path) -> Result<()> {
    let manifest = load_manifest(file)?;
    let graph = WorkflowGraph::from_manifest(&manifest);

    let rendered = serde_json::to_string_pretty(&graph.to_json()).context("Failed to render graph")?;
    println!("{}", rendered);

    let problems = graph.validate();
    if !problems.is_empty() {
        println!();
        println!("{}", "Graph issues:".yellow().bold());
        for problem in problems {
            println!("  - {}", problem);
        }
    }
    Ok(())
}
