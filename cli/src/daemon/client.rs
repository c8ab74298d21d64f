// Copyright (c) 2026 AOL Contributors
// SPDX-License-Identifier: AGPL-3.0

//! HTTP client for a running core's monitoring API

use anyhow::{Context, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;

use aol_core::domain::{service::ServiceView, workflow::WorkflowDefinition};

#[derive(Debug, Clone)]
pub struct CoreClient {
    client: Client,
    base_url: String,
}

impl CoreClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn parse<T: DeserializeOwned>(response: reqwest::Response, what: &str) -> Result<T> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v["error"].as_str().map(str::to_string))
                .unwrap_or(body);
            anyhow::bail!("Failed to {}: HTTP {}: {}", what, status, message);
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse response to {}", what))
    }

    /// All registered instances, optionally restricted to one service type.
    pub async fn list_services(&self, filter_type: Option<&str>) -> Result<Vec<ServiceView>> {
        let response = self
            .client
            .get(format!("{}/api/services", self.base_url))
            .send()
            .await
            .context("Failed to list services")?;

        let services: Vec<ServiceView> = Self::parse(response, "list services").await?;
        Ok(services
            .into_iter()
            .filter(|s| {
                filter_type.is_none_or(|t| {
                    s.manifest
                        .pointer("/metadata/labels/aol.service.type")
                        .and_then(Value::as_str)
                        == Some(t)
                })
            })
            .collect())
    }

    pub async fn registry_stats(&self) -> Result<Value> {
        let response = self
            .client
            .get(format!("{}/api/registry/stats", self.base_url))
            .send()
            .await
            .context("Failed to fetch registry stats")?;
        Self::parse(response, "fetch registry stats").await
    }

    /// Submits a workflow for execution and waits for its outcome.
    pub async fn run_workflow(
        &self,
        workflow: &WorkflowDefinition,
        input: Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let body = json!({
            "workflow": workflow,
            "input": input,
            "timeout_seconds": timeout.map(|t| t.as_secs()),
        });

        let response = self
            .client
            .post(format!("{}/api/workflows/run", self.base_url))
            .json(&body)
            .send()
            .await
            .context("Failed to submit workflow")?;
        Self::parse(response, "run workflow").await
    }
}
