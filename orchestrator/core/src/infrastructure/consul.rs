// Copyright (c) 2026 AOL Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Consul Client
//!
//! Thin HTTP client for the parts of the Consul agent API the core uses:
//! service registration with an HTTP health check, health-filtered discovery,
//! the catalog, the KV store and blocking-query watches.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** External service discovery adapter

use crate::domain::config::{parse_consul_addr, ConsulConfig};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ConsulError {
    #[error("Consul request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Consul returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid KV payload: {0}")]
    Decode(String),
}

/// HTTP health check attached to a registration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ConsulCheck {
    #[serde(rename = "HTTP")]
    pub http: String,
    pub interval: String,
    pub timeout: String,
    pub deregister_critical_service_after: String,
}

impl ConsulCheck {
    /// Default check: `GET http://{address}:{health_port}/health` every 10s.
    pub fn http_default(address: &str, health_port: u16) -> Self {
        Self {
            http: format!("http://{address}:{health_port}/health"),
            interval: "10s".to_string(),
            timeout: "5s".to_string(),
            deregister_critical_service_after: "30s".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ConsulRegistration {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub meta: HashMap<String, String>,
    pub check: ConsulCheck,
}

impl ConsulRegistration {
    pub fn new(id: impl Into<String>, name: impl Into<String>, address: impl Into<String>, port: u16, health_port: u16) -> Self {
        let address = address.into();
        let mut meta = HashMap::new();
        meta.insert("health_port".to_string(), health_port.to_string());
        Self {
            id: id.into(),
            name: name.into(),
            check: ConsulCheck::http_default(&address, health_port),
            address,
            port,
            tags: Vec::new(),
            meta,
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

/// Instance as reported by Consul discovery
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveredInstance {
    pub id: String,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub health_port: u16,
    pub metrics_port: u16,
    pub tags: Vec<String>,
    pub meta: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct HealthEntry {
    #[serde(rename = "Service")]
    service: AgentService,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AgentService {
    #[serde(rename = "ID")]
    id: String,
    service: String,
    #[serde(default)]
    address: String,
    port: u16,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    meta: Option<HashMap<String, String>>,
}

impl From<AgentService> for DiscoveredInstance {
    fn from(service: AgentService) -> Self {
        let meta = service.meta.unwrap_or_default();
        let port_from = |key: &str| meta.get(key).and_then(|v| v.parse().ok()).unwrap_or(0);
        Self {
            health_port: port_from("health_port"),
            metrics_port: port_from("metrics_port"),
            id: service.id,
            name: service.service,
            address: service.address,
            port: service.port,
            tags: service.tags.unwrap_or_default(),
            meta,
        }
    }
}

#[derive(Debug, Deserialize)]
struct KvEntry {
    #[serde(rename = "Value")]
    value: Option<String>,
}

#[derive(Clone)]
pub struct ConsulClient {
    base_url: String,
    client: reqwest::Client,
}

impl ConsulClient {
    pub fn new(host: &str, port: u16) -> Self {
        Self::with_base_url(format!("http://{host}:{port}"))
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(40))
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn from_config(config: &ConsulConfig) -> Self {
        Self::new(&config.host, config.port)
    }

    /// Connection from `CONSUL_HTTP_ADDR`, defaulting to `consul-server:8500`.
    pub fn from_env() -> Self {
        let (host, port) = std::env::var("CONSUL_HTTP_ADDR")
            .ok()
            .and_then(|addr| parse_consul_addr(&addr))
            .map(|(host, port)| (host, port.unwrap_or(8500)))
            .unwrap_or_else(|| ("consul-server".to_string(), 8500));
        Self::new(&host, port)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ConsulError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ConsulError::Status {
            status: status.as_u16(),
            body,
        })
    }

    pub async fn register_service(&self, registration: &ConsulRegistration) -> Result<(), ConsulError> {
        let url = format!("{}/v1/agent/service/register", self.base_url);
        let response = self.client.put(&url).json(registration).send().await?;
        Self::check(response).await?;
        info!(
            service = %registration.name,
            service_id = %registration.id,
            "Registered with Consul at {}:{}", registration.address, registration.port
        );
        Ok(())
    }

    pub async fn deregister_service(&self, service_id: &str) -> Result<(), ConsulError> {
        let url = format!("{}/v1/agent/service/deregister/{}", self.base_url, service_id);
        let response = self.client.put(&url).send().await?;
        Self::check(response).await?;
        info!(service_id = %service_id, "Deregistered from Consul");
        Ok(())
    }

    pub async fn discover_service(&self, name: &str, healthy_only: bool) -> Result<Vec<DiscoveredInstance>, ConsulError> {
        let url = format!("{}/v1/health/service/{}", self.base_url, name);
        let mut request = self.client.get(&url);
        if healthy_only {
            request = request.query(&[("passing", "true")]);
        }
        let response = Self::check(request.send().await?).await?;
        let entries: Vec<HealthEntry> = response.json().await?;
        let instances: Vec<DiscoveredInstance> = entries.into_iter().map(|e| e.service.into()).collect();
        debug!(service = %name, count = instances.len(), "Discovered instances");
        Ok(instances)
    }

    /// Service names known to the catalog, with their tags.
    pub async fn list_services(&self) -> Result<BTreeMap<String, Vec<String>>, ConsulError> {
        let url = format!("{}/v1/catalog/services", self.base_url);
        let response = Self::check(self.client.get(&url).send().await?).await?;
        Ok(response.json().await?)
    }

    pub async fn get_config(&self, key: &str) -> Result<Option<String>, ConsulError> {
        let url = format!("{}/v1/kv/{}", self.base_url, key);
        let response = self.client.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let entries: Vec<KvEntry> = Self::check(response).await?.json().await?;
        let Some(encoded) = entries.into_iter().next().and_then(|e| e.value) else {
            return Ok(None);
        };
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| ConsulError::Decode(e.to_string()))?;
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|e| ConsulError::Decode(e.to_string()))
    }

    pub async fn set_config(&self, key: &str, value: &str) -> Result<bool, ConsulError> {
        let url = format!("{}/v1/kv/{}", self.base_url, key);
        let response = self.client.put(&url).body(value.to_string()).send().await?;
        let stored: bool = Self::check(response).await?.json().await?;
        Ok(stored)
    }

    /// Streams the instance list of `name` whenever Consul reports a change,
    /// using blocking queries. Returns when cancelled or the receiver is gone.
    pub async fn watch_service(
        &self,
        name: &str,
        sender: mpsc::Sender<Vec<DiscoveredInstance>>,
        cancel: CancellationToken,
    ) {
        let url = format!("{}/v1/health/service/{}", self.base_url, name);
        let mut index: Option<String> = None;

        loop {
            let mut request = self.client.get(&url).query(&[("wait", "30s")]);
            if let Some(idx) = &index {
                request = request.query(&[("index", idx.as_str())]);
            }

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return,
                outcome = request.send() => outcome,
            };

            let result = match outcome {
                Ok(response) => match Self::check(response).await {
                    Ok(response) => {
                        let new_index = response
                            .headers()
                            .get("X-Consul-Index")
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string);
                        response
                            .json::<Vec<HealthEntry>>()
                            .await
                            .map(|entries| (new_index, entries))
                            .map_err(ConsulError::from)
                    }
                    Err(e) => Err(e),
                },
                Err(e) => Err(ConsulError::from(e)),
            };

            match result {
                Ok((new_index, entries)) => {
                    if new_index.is_some() && new_index == index {
                        continue;
                    }
                    index = new_index;
                    let instances = entries.into_iter().map(|e| e.service.into()).collect();
                    if sender.send(instances).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    warn!(service = %name, error = %e, "Watch error");
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_check_targets_health_port() {
        let registration = ConsulRegistration::new("aol-core-h1", "aol-core", "10.0.0.5", 50051, 50201);
        assert_eq!(registration.check.http, "http://10.0.0.5:50201/health");
        assert_eq!(registration.check.deregister_critical_service_after, "30s");
        let json = serde_json::to_value(&registration).unwrap();
        assert_eq!(json["ID"], "aol-core-h1");
        assert_eq!(json["Check"]["HTTP"], "http://10.0.0.5:50201/health");
        assert_eq!(json["Check"]["DeregisterCriticalServiceAfter"], "30s");
    }

    #[test]
    fn test_discovered_instance_reads_meta_ports() {
        let service = AgentService {
            id: "a-1".into(),
            service: "a".into(),
            address: "h".into(),
            port: 1,
            tags: None,
            meta: Some(HashMap::from([("health_port".to_string(), "2".to_string())])),
        };
        let instance = DiscoveredInstance::from(service);
        assert_eq!(instance.health_port, 2);
        assert_eq!(instance.metrics_port, 0);
        assert!(instance.tags.is_empty());
    }
}
