// Copyright (c) 2026 AOL Contributors
// SPDX-License-Identifier: AGPL-3.0

//! `aol services list [--type TYPE]` lists instances registered with a running core.

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;

use aol_core::domain::service::{ServiceStatus, ServiceView};

use crate::daemon::{check_core_running, CoreClient, CoreStatus};

#[derive(Subcommand)]
pub enum ServicesCommand {
    /// List registered services
    List {
        /// Only show services whose `aol.service.type` label matches (e.g. AOLAgent)
        #[arg(long = "type", value_name = "TYPE")]
        service_type: Option<String>,
    },
}

pub async fn handle_command(command: ServicesCommand, core_url: &str) -> Result<()> {
    match command {
        ServicesCommand::List { service_type } => list(core_url, service_type.as_deref()).await,
    }
}

fn status_label(status: ServiceStatus) -> colored::ColoredString {
    let text = status.to_string();
    match status {
        ServiceStatus::Healthy => text.green(),
        ServiceStatus::Unhealthy => text.red(),
        _ => text.yellow(),
    }
}

pub fn service_type_of(view: &ServiceView) -> &str {
    view.manifest
        .pointer("/metadata/labels/aol.service.type")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("-")
}

async fn list(core_url: &str, service_type: Option<&str>) -> Result<()> {
    match check_core_running(core_url).await? {
        CoreStatus::Running { .. } => {}
        CoreStatus::Unhealthy { error } => {
            println!("{}", format!("⚠ Core at {} is unhealthy: {}", core_url, error).yellow());
            return Ok(());
        }
        CoreStatus::Stopped => {
            println!("{}", format!("No core running at {}", core_url).red());
            println!("Run 'aol serve' to start one.");
            return Ok(());
        }
    }

    let client = CoreClient::new(core_url)?;
    let services = client.list_services(service_type).await?;

    if services.is_empty() {
        println!("{}", "No services registered".dimmed());
        return Ok(());
    }

    println!(
        "{:<24} {:<10} {:<8} {:<22} {:<10}",
        "NAME".bold(),
        "VERSION".bold(),
        "TYPE".bold(),
        "ADDRESS".bold(),
        "STATUS".bold()
    );
    for service in &services {
        println!(
            "{:<24} {:<10} {:<8} {:<22} {:<10}",
            service.name,
            service.version,
            service_type_of(service),
            format!("{}:{}", service.host, service.grpc_port),
            status_label(service.status)
        );
    }
    println!();
    println!("{} service instance(s)", services.len());

    Ok(())
}
