// Copyright (c) 2026 AOL Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Service scaffolding
//!
//! `aol service create <NAME>` copies a template tree into `<output>/<NAME>`,
//! substituting `{{SERVICE_NAME}}`, `{{SERVICE_KIND}}`, `{{GRPC_PORT}}`,
//! `{{HEALTH_PORT}}` and `{{METRICS_PORT}}` in text files, then validates the
//! generated manifest. Without `--template` the built-in template is used.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use aol_core::domain::manifest::{ManifestValidator, ValidationResult, VALID_KINDS};

const SUBSTITUTED_EXTENSIONS: &[&str] = &["yaml", "yml", "hcl", "md", "toml"];

const BUILTIN_TEMPLATE: &[(&str, &str)] = &[
    ("manifest.yaml", include_str!("../../templates/service/manifest.yaml")),
    ("config.yaml", include_str!("../../templates/service/config.yaml")),
    ("README.md", include_str!("../../templates/service/README.md")),
];

#[derive(Subcommand)]
pub enum ServiceCommand {
    /// Scaffold a new service from a template
    Create {
        #[arg(value_name = "NAME")]
        name: String,

        /// Manifest kind (AOLAgent, AOLTool, AOLPlugin, AOLService)
        #[arg(long, default_value = "AOLAgent")]
        kind: String,

        /// Template directory (default: built-in template)
        #[arg(long, value_name = "DIR")]
        template: Option<PathBuf>,

        /// Parent directory of the new service
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        #[arg(long, default_value_t = 50051)]
        grpc_port: u16,

        #[arg(long, default_value_t = 50052)]
        health_port: u16,

        #[arg(long, default_value_t = 9090)]
        metrics_port: u16,
    },
}

#[derive(Debug, Clone)]
pub struct ScaffoldOptions {
    pub name: String,
    pub kind: String,
    pub template: Option<PathBuf>,
    pub output: PathBuf,
    pub grpc_port: u16,
    pub health_port: u16,
    pub metrics_port: u16,
}

#[derive(Debug)]
pub struct ScaffoldReport {
    pub path: PathBuf,
    pub files_written: usize,
    /// `None` when the template has no `manifest.yaml`
    pub validation: Option<ValidationResult>,
}

pub async fn handle_command(command: ServiceCommand) -> Result<()> {
    match command {
        ServiceCommand::Create {
            name,
            kind,
            template,
            output,
            grpc_port,
            health_port,
            metrics_port,
        } => {
            let report = scaffold_service(&ScaffoldOptions {
                name,
                kind,
                template,
                output,
                grpc_port,
                health_port,
                metrics_port,
            })?;
            print_report(&report);
            Ok(())
        }
    }
}

fn print_report(report: &ScaffoldReport) {
    println!(
        "{}",
        format!(
            "✓ Created {} ({} files)",
            report.path.display(),
            report.files_written
        )
        .green()
    );
    match &report.validation {
        Some(result) if result.valid => println!("  Manifest: {}", "valid".green()),
        Some(result) => {
            println!("  Manifest: {}", "invalid".red());
            for issue in &result.issues {
                println!("    {}", issue);
            }
        }
        None => println!("  Manifest: {}", "not found in template".yellow()),
    }
}

fn substitute(content: &str, options: &ScaffoldOptions) -> String {
    [
        ("{{SERVICE_NAME}}", options.name.clone()),
        ("{{SERVICE_KIND}}", options.kind.clone()),
        ("{{GRPC_PORT}}", options.grpc_port.to_string()),
        ("{{HEALTH_PORT}}", options.health_port.to_string()),
        ("{{METRICS_PORT}}", options.metrics_port.to_string()),
    ]
    .iter()
    .fold(content.to_string(), |acc, (placeholder, value)| acc.replace(placeholder, value))
}

fn is_substituted(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| SUBSTITUTED_EXTENSIONS.contains(&ext))
}

fn check_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        && !name.starts_with('-');
    if !valid {
        anyhow::bail!(
            "Invalid service name '{}': use lowercase letters, digits, '-' or '_'",
            name
        );
    }
    Ok(())
}

fn copy_template(template: &Path, target: &Path, options: &ScaffoldOptions) -> Result<usize> {
    if !template.is_dir() {
        anyhow::bail!("Template directory not found: {}", template.display());
    }

    let mut written = 0;
    for entry in WalkDir::new(template).min_depth(1) {
        let entry = entry.context("Failed to walk template directory")?;
        let relative = entry
            .path()
            .strip_prefix(template)
            .context("Template entry outside template root")?;
        if relative.components().any(|c| c.as_os_str() == ".git") {
            continue;
        }
        let destination = target.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&destination)
                .with_context(|| format!("Failed to create {}", destination.display()))?;
            continue;
        }

        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if is_substituted(entry.path()) {
            let content = std::fs::read_to_string(entry.path())
                .with_context(|| format!("Failed to read {}", entry.path().display()))?;
            std::fs::write(&destination, substitute(&content, options))
                .with_context(|| format!("Failed to write {}", destination.display()))?;
        } else {
            std::fs::copy(entry.path(), &destination)
                .with_context(|| format!("Failed to copy {}", entry.path().display()))?;
        }
        written += 1;
    }
    Ok(written)
}

fn write_builtin(target: &Path, options: &ScaffoldOptions) -> Result<usize> {
    for (file, content) in BUILTIN_TEMPLATE {
        let destination = target.join(file);
        std::fs::write(&destination, substitute(content, options))
            .with_context(|| format!("Failed to write {}", destination.display()))?;
    }
    Ok(BUILTIN_TEMPLATE.len())
}

pub fn scaffold_service(options: &ScaffoldOptions) -> Result<ScaffoldReport> {
    check_name(&options.name)?;
    if !VALID_KINDS.contains(&options.kind.as_str()) {
        anyhow::bail!(
            "Invalid kind '{}'. Must be one of: {}",
            options.kind,
            VALID_KINDS.join(", ")
        );
    }

    let target = options.output.join(&options.name);
    if target.exists() {
        anyhow::bail!("{} already exists; refusing to overwrite", target.display());
    }
    std::fs::create_dir_all(&target)
        .with_context(|| format!("Failed to create {}", target.display()))?;

    let files_written = match &options.template {
        Some(template) => copy_template(template, &target, options)?,
        None => write_builtin(&target, options)?,
    };

    let manifest = target.join("manifest.yaml");
    let validation = manifest
        .exists()
        .then(|| ManifestValidator::new(false).validate_file(&manifest));

    Ok(ScaffoldReport {
        path: target,
        files_written,
        validation,
    })
}
