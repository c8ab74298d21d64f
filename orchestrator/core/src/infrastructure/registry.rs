// Copyright (c) 2026 AOL Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Service Registry Implementation
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Keep track of live service instances
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! Instances are grouped by service name. Two instances on the same host may
//! not share any of their gRPC, health or metrics ports; instances on
//! different hosts may.

use crate::domain::registry::{RegistryError, ServiceRegistry};
use crate::domain::service::{ServiceId, ServiceInstance, ServiceStatus};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::info;

const REQUIRED_MANIFEST_FIELDS: [&str; 4] = ["kind", "apiVersion", "metadata", "spec"];

#[derive(Clone, Default)]
pub struct InMemoryServiceRegistry {
    services: Arc<RwLock<BTreeMap<String, Vec<ServiceInstance>>>>,
    cursors: Arc<RwLock<HashMap<String, Arc<AtomicUsize>>>>,
}

impl InMemoryServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_manifest(manifest: &Value) -> Result<(), RegistryError> {
        let missing: Vec<String> = REQUIRED_MANIFEST_FIELDS
            .iter()
            .filter(|field| manifest.get(**field).is_none())
            .map(|field| format!("missing required field '{field}'"))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(RegistryError::InvalidManifest(missing))
        }
    }

    fn check_ports(
        services: &BTreeMap<String, Vec<ServiceInstance>>,
        candidate: &ServiceInstance,
    ) -> Result<(), RegistryError> {
        let wanted = candidate.ports();
        for existing in services.values().flatten() {
            if existing.host != candidate.host {
                continue;
            }
            if let Some(port) = wanted.iter().find(|p| existing.ports().contains(p)) {
                return Err(RegistryError::PortConflict {
                    host: candidate.host.clone(),
                    port: *port,
                    existing: format!("{} ({})", existing.name, existing.service_id),
                });
            }
        }
        Ok(())
    }

    fn cursor(&self, name: &str) -> Arc<AtomicUsize> {
        if let Some(cursor) = self.cursors.read().get(name) {
            return cursor.clone();
        }
        self.cursors
            .write()
            .entry(name.to_string())
            .or_default()
            .clone()
    }
}

#[async_trait]
impl ServiceRegistry for InMemoryServiceRegistry {
    async fn register(&self, instance: ServiceInstance) -> Result<ServiceId, RegistryError> {
        Self::check_manifest(&instance.manifest)?;
        if instance.name.is_empty() {
            return Err(RegistryError::InvalidManifest(vec![
                "metadata.name cannot be empty".to_string(),
            ]));
        }

        let mut services = self.services.write();
        Self::check_ports(&services, &instance)?;

        let service_id = instance.service_id;
        info!(
            service = %instance.name,
            service_id = %service_id,
            address = %instance.address(),
            "Registered service instance"
        );
        services.entry(instance.name.clone()).or_default().push(instance);
        Ok(service_id)
    }

    async fn deregister(&self, name: &str, service_id: ServiceId) -> Result<bool, RegistryError> {
        let mut services = self.services.write();
        let Some(instances) = services.get_mut(name) else {
            return Ok(false);
        };
        let before = instances.len();
        instances.retain(|i| i.service_id != service_id);
        let removed = instances.len() != before;
        if instances.is_empty() {
            services.remove(name);
        }
        if removed {
            info!(service = %name, service_id = %service_id, "Deregistered service instance");
        }
        Ok(removed)
    }

    async fn get_service(&self, name: &str) -> Result<Option<ServiceInstance>, RegistryError> {
        let healthy: Vec<ServiceInstance> = self
            .services
            .read()
            .get(name)
            .map(|instances| instances.iter().filter(|i| i.is_healthy()).cloned().collect())
            .unwrap_or_default();
        if healthy.is_empty() {
            return Ok(None);
        }
        let index = self.cursor(name).fetch_add(1, Ordering::Relaxed) % healthy.len();
        Ok(healthy.into_iter().nth(index))
    }

    async fn get_instances(&self, name: &str) -> Result<Vec<ServiceInstance>, RegistryError> {
        Ok(self.services.read().get(name).cloned().unwrap_or_default())
    }

    async fn list_services(&self) -> Result<BTreeMap<String, Vec<ServiceInstance>>, RegistryError> {
        Ok(self.services.read().clone())
    }

    async fn update_service_health(
        &self,
        name: &str,
        service_id: ServiceId,
        status: ServiceStatus,
    ) -> Result<bool, RegistryError> {
        let mut services = self.services.write();
        let instance = services
            .get_mut(name)
            .and_then(|instances| instances.iter_mut().find(|i| i.service_id == service_id));
        match instance {
            Some(instance) => {
                instance.status = status;
                instance.last_heartbeat = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
