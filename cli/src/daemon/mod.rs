// Copyright (c) 2026 AOL Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Core server process and client access
//!
//! Handles:
//! - Wiring and serving the core (`aol serve`)
//! - Graceful shutdown
//! - HTTP health checks against a running core

use anyhow::Result;
use std::time::Duration;

pub mod client;
pub mod server;

pub use client::CoreClient;
pub use server::{build_runtime, start_server, CoreRuntime};

/// Default address of a locally running core's monitoring API.
pub const DEFAULT_CORE_URL: &str = "http://127.0.0.1:50201";

#[derive(Debug, Clone, PartialEq)]
pub enum CoreStatus {
    Running { services: Vec<String> },
    Unhealthy { error: String },
    Stopped,
}

/// Check whether a core answers `/health` at `base_url`.
pub async fn check_core_running(base_url: &str) -> Result<CoreStatus> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(500))
        .build()?;

    let health_url = format!("{}/health", base_url.trim_end_matches('/'));
    match client.get(&health_url).send().await {
        Ok(resp) if resp.status().is_success() => {
            let services = resp
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|v| {
                    v["services"].as_array().map(|names| {
                        names
                            .iter()
                            .filter_map(|n| n.as_str().map(str::to_string))
                            .collect()
                    })
                })
                .unwrap_or_default();
            Ok(CoreStatus::Running { services })
        }
        Ok(resp) => Ok(CoreStatus::Unhealthy {
            error: format!("HTTP {}", resp.status()),
        }),
        Err(_) => Ok(CoreStatus::Stopped),
    }
}
