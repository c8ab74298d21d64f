// Copyright (c) 2026 AOL Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Workflow command implementations
//!
//! # Commands
//!
//! - `aol workflow validate <file>` - Parse and validate a workflow definition
//! - `aol workflow run <file>` - Execute a workflow on a running core

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

use aol_core::domain::workflow::{WorkflowDefinition, WorkflowGraph};

use crate::daemon::{check_core_running, CoreClient, CoreStatus};

#[derive(Subcommand)]
pub enum WorkflowCommand {
    /// Validate a workflow definition file
    Validate {
        /// Path to workflow YAML file
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Execute a workflow on the running core
    Run {
        /// Path to workflow YAML file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Workflow input (JSON string)
        #[arg(long, short = 'i', value_name = "JSON")]
        input: Option<String>,

        /// Execution timeout in seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },
}

pub async fn handle_command(command: WorkflowCommand, core_url: &str) -> Result<()> {
    match command {
        WorkflowCommand::Validate { file } => validate_workflow(&file),
        WorkflowCommand::Run {
            file,
            input,
            timeout,
        } => run_workflow(&file, input, timeout, core_url).await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

pub fn load_definition(file: &Path) -> Result<WorkflowDefinition> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read workflow {}", file.display()))?;
    WorkflowDefinition::from_yaml(&content).context("Failed to parse workflow definition")
}

/// Returns the graph's structural problems; empty when the workflow is runnable.
pub fn check_definition(definition: WorkflowDefinition) -> (WorkflowGraph, Vec<String>) {
    let graph = definition.into_graph();
    let problems = graph.validate();
    (graph, problems)
}

fn validate_workflow(file: &Path) -> Result<()> {
    println!("{}", "📋 Validating workflow...".cyan());
    println!("   File: {}", file.display());
    println!();

    let (graph, problems) = check_definition(load_definition(file)?);

    if !problems.is_empty() {
        println!("{}", "✗ Workflow is invalid".red().bold());
        for problem in &problems {
            println!("  - {}", problem);
        }
        anyhow::bail!("Workflow validation failed with {} issue(s)", problems.len());
    }

    println!("{}", "✓ Workflow is valid!".green().bold());
    println!();
    println!("Workflow Details:");
    println!("  Name:   {}", graph.name);
    println!("  Nodes:  {}", graph.nodes().len());
    println!("  Edges:  {}", graph.edges().len());
    println!("  Agents: {}", graph.agents().join(", "));

    Ok(())
}

async fn run_workflow(
    file: &Path,
    input_json: Option<String>,
    timeout: Option<u64>,
    core_url: &str,
) -> Result<()> {
    match check_core_running(core_url).await? {
        CoreStatus::Running { .. } => {}
        _ => {
            println!(
                "{}",
                "Workflow execution requires a running core.".red()
            );
            println!("Run 'aol serve' to start one.");
            return Ok(());
        }
    }

    let definition = load_definition(file)?;
    let input: Value = match input_json {
        Some(json) => serde_json::from_str(&json).context("Invalid JSON input")?,
        None => Value::Object(Default::default()),
    };

    println!("{}", "🚀 Starting workflow execution...".cyan());
    println!("   Workflow: {}", definition.name);
    println!();

    let client = CoreClient::new(core_url)?;
    let response = client
        .run_workflow(&definition, input, timeout.map(Duration::from_secs))
        .await?;

    let outcome = &response["outcome"];
    if outcome["success"].as_bool().unwrap_or(false) {
        println!("{}", "✓ Workflow completed".green().bold());
    } else {
        println!("{}", "✗ Workflow failed".red().bold());
        if let Some(error) = outcome["error"].as_str() {
            println!("  Error: {}", error);
        }
    }
    println!();
    println!("  Workflow ID:  {}", response["workflow_id"].as_str().unwrap_or("-"));
    println!("  Execution ID: {}", outcome["execution_id"].as_str().unwrap_or("-"));
    if let Some(duration) = outcome["duration_seconds"].as_f64() {
        println!("  Duration:     {:.3}s", duration);
    }
    if let Some(result) = outcome.get("result") {
        println!();
        println!("{}", serde_json::to_string_pretty(result)?);
    }

    Ok(())
}
