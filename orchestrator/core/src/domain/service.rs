// Copyright (c) 2026 AOL Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Service Domain Model
//!
//! Registered service instances and the status values the registry tracks for
//! them. A service is identified by its manifest `metadata.name`; several
//! instances may share a name and are distinguished by [`ServiceId`].
//!
//! # Architecture
//!
//! - **Layer:** Domain
//! - **Purpose:** Service instance aggregate and dashboard DTO

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Manifest label carrying the service type, used for filtering and stats.
pub const SERVICE_TYPE_LABEL: &str = "aol.service.type";

// ============================================================================
// Value Objects
// ============================================================================

/// Unique identifier of a registered service instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceId(pub Uuid);

impl ServiceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ServiceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ServiceId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Registry-level health status of a service instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Healthy,
    Unhealthy,
    Starting,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Healthy => "healthy",
            ServiceStatus::Unhealthy => "unhealthy",
            ServiceStatus::Starting => "starting",
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "healthy" => Ok(ServiceStatus::Healthy),
            "unhealthy" => Ok(ServiceStatus::Unhealthy),
            "starting" => Ok(ServiceStatus::Starting),
            other => Err(format!("unknown service status '{other}'")),
        }
    }
}

// ============================================================================
// Aggregate: ServiceInstance
// ============================================================================

/// A single running instance of a registered service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub service_id: ServiceId,
    pub name: String,
    pub version: String,
    pub host: String,
    pub grpc_port: u16,
    pub health_port: u16,
    pub metrics_port: u16,
    pub manifest: Value,
    pub status: ServiceStatus,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

impl ServiceInstance {
    /// Creates an instance in the `starting` state.
    pub fn new(
        manifest: Value,
        host: impl Into<String>,
        grpc_port: u16,
        health_port: u16,
        metrics_port: u16,
    ) -> Self {
        let now = Utc::now();
        let metadata = manifest.get("metadata");
        let name = metadata
            .and_then(|m| m.get("name"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let version = metadata
            .and_then(|m| m.get("version"))
            .and_then(Value::as_str)
            .unwrap_or("0.0.0")
            .to_string();

        Self {
            service_id: ServiceId::new(),
            name,
            version,
            host: host.into(),
            grpc_port,
            health_port,
            metrics_port,
            manifest,
            status: ServiceStatus::Starting,
            registered_at: now,
            last_heartbeat: now,
        }
    }

    /// Key used by the load balancer and the channel pool.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.grpc_port)
    }

    pub fn kind(&self) -> &str {
        self.manifest
            .get("kind")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
    }

    pub fn service_type(&self) -> &str {
        self.manifest
            .pointer("/metadata/labels")
            .and_then(|labels| labels.get(SERVICE_TYPE_LABEL))
            .and_then(Value::as_str)
            .unwrap_or("unknown")
    }

    pub fn ports(&self) -> [u16; 3] {
        [self.grpc_port, self.health_port, self.metrics_port]
    }

    pub fn is_healthy(&self) -> bool {
        self.status == ServiceStatus::Healthy
    }
}

/// JSON shape served to the monitoring dashboard
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceView {
    pub name: String,
    pub version: String,
    pub host: String,
    pub grpc_port: u16,
    pub health_port: u16,
    pub metrics_port: u16,
    pub status: ServiceStatus,
    pub service_id: ServiceId,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub manifest: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performance: Option<Value>,
}

impl From<&ServiceInstance> for ServiceView {
    fn from(instance: &ServiceInstance) -> Self {
        Self {
            name: instance.name.clone(),
            version: instance.version.clone(),
            host: instance.host.clone(),
            grpc_port: instance.grpc_port,
            health_port: instance.health_port,
            metrics_port: instance.metrics_port,
            status: instance.status,
            service_id: instance.service_id,
            registered_at: instance.registered_at,
            last_heartbeat: instance.last_heartbeat,
            manifest: instance.manifest.clone(),
            performance: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manifest() -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "AOLAgent",
            "metadata": {
                "name": "planner",
                "version": "1.2.0",
                "labels": { "aol.service.type": "reasoning" }
            },
            "spec": {}
        })
    }

    #[test]
    fn test_instance_reads_manifest_metadata() {
        let instance = ServiceInstance::new(manifest(), "10.0.0.4", 50060, 50061, 50062);
        assert_eq!(instance.name, "planner");
        assert_eq!(instance.version, "1.2.0");
        assert_eq!(instance.kind(), "AOLAgent");
        assert_eq!(instance.service_type(), "reasoning");
        assert_eq!(instance.status, ServiceStatus::Starting);
        assert_eq!(instance.address(), "10.0.0.4:50060");
    }

    #[test]
    fn test_missing_labels_fall_back_to_unknown() {
        let instance = ServiceInstance::new(json!({"metadata": {"name": "x"}}), "h", 1, 2, 3);
        assert_eq!(instance.service_type(), "unknown");
        assert_eq!(instance.kind(), "unknown");
        assert_eq!(instance.version, "0.0.0");
    }

    #[test]
    fn test_status_wire_format() {
        assert_eq!(serde_json::to_value(ServiceStatus::Unhealthy).unwrap(), json!("unhealthy"));
        assert_eq!("HEALTHY".parse::<ServiceStatus>().unwrap(), ServiceStatus::Healthy);
        assert!("gone".parse::<ServiceStatus>().is_err());
    }
}
