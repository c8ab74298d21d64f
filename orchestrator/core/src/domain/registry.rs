// Copyright (c) 2026 AOL Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Service Registry Interface
//!
//! Persistence contract for registered service instances. The interface lives
//! in the domain layer and is implemented in `crate::infrastructure::registry`.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `ServiceRegistry` | `ServiceInstance` | `InMemoryServiceRegistry` |

use crate::domain::service::{ServiceId, ServiceInstance, ServiceStatus};
use async_trait::async_trait;
use std::collections::BTreeMap;

#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    /// Registers a new instance and returns its id.
    async fn register(&self, instance: ServiceInstance) -> Result<ServiceId, RegistryError>;

    /// Removes an instance. Returns `false` when it was not registered.
    async fn deregister(&self, name: &str, service_id: ServiceId) -> Result<bool, RegistryError>;

    /// A healthy instance of `name`, rotating across healthy instances.
    async fn get_service(&self, name: &str) -> Result<Option<ServiceInstance>, RegistryError>;

    /// All instances registered under `name`, regardless of status.
    async fn get_instances(&self, name: &str) -> Result<Vec<ServiceInstance>, RegistryError>;

    /// Every instance grouped by service name.
    async fn list_services(&self) -> Result<BTreeMap<String, Vec<ServiceInstance>>, RegistryError>;

    /// Sets the status of one instance and refreshes its heartbeat.
    /// Returns `false` when the instance is unknown.
    async fn update_service_health(
        &self,
        name: &str,
        service_id: ServiceId,
        status: ServiceStatus,
    ) -> Result<bool, RegistryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Port conflict: {host}:{port} is already used by {existing}")]
    PortConflict {
        host: String,
        port: u16,
        existing: String,
    },

    #[error("Invalid manifest: {}", .0.join("; "))]
    InvalidManifest(Vec<String>),

    #[error("Service not found: {0}")]
    NotFound(String),

    #[error("Registry backend error: {0}")]
    Backend(String),
}
