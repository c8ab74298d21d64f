// Copyright (c) 2026 AOL Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Registration Application Service
//!
//! Entry point for services joining and leaving the mesh. Wraps the registry
//! with manifest linting and lifecycle events.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Register, deregister, look up and receive health reports
//!   from services
//! - **Dependencies:** Domain (ServiceRegistry, ManifestValidator), EventStore

use crate::application::event_store::EventStore;
use crate::domain::events::{Event, EventType};
use crate::domain::manifest::{ManifestValidator, ValidationSeverity};
use crate::domain::registry::{RegistryError, ServiceRegistry};
use crate::domain::service::{ServiceId, ServiceInstance, ServiceStatus};
use crate::infrastructure::telemetry;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub manifest: Value,
    pub host: String,
    pub grpc_port: u16,
    pub health_port: u16,
    pub metrics_port: u16,
}

pub struct RegistrationService {
    registry: Arc<dyn ServiceRegistry>,
    event_store: Arc<EventStore>,
    validator: ManifestValidator,
}

impl RegistrationService {
    pub fn new(registry: Arc<dyn ServiceRegistry>, event_store: Arc<EventStore>) -> Self {
        Self {
            registry,
            event_store,
            validator: ManifestValidator::new(false),
        }
    }

    pub fn registry(&self) -> &Arc<dyn ServiceRegistry> {
        &self.registry
    }

    /// Registers a new instance in the `starting` state.
    ///
    /// Manifest lint findings are logged; only the registry's structural and
    /// port checks can reject the request.
    pub async fn register(&self, request: RegisterRequest) -> Result<ServiceInstance, RegistryError> {
        let lint = self.validator.validate(&request.manifest);
        for issue in &lint.issues {
            match issue.severity {
                ValidationSeverity::Error | ValidationSeverity::Warning => {
                    warn!(path = %issue.path, "Manifest issue: {}", issue.message)
                }
                ValidationSeverity::Info => debug!(path = %issue.path, "Manifest note: {}", issue.message),
            }
        }

        let instance = ServiceInstance::new(
            request.manifest,
            request.host,
            request.grpc_port,
            request.health_port,
            request.metrics_port,
        );
        self.registry.register(instance.clone()).await?;

        let event = Event::new(EventType::ServiceRegistered)
            .with_service(instance.name.clone())
            .with_service_id(instance.service_id.to_string())
            .with_metadata(json!({
                "host": instance.host,
                "grpc_port": instance.grpc_port,
            }));
        self.event_store.add_event(event).await;
        self.refresh_gauge().await;

        Ok(instance)
    }

    /// Returns `false` when no such instance was registered; no event is
    /// emitted in that case.
    pub async fn deregister(&self, name: &str, service_id: ServiceId) -> Result<bool, RegistryError> {
        let removed = self.registry.deregister(name, service_id).await?;
        if removed {
            let event = Event::new(EventType::ServiceDeregistered)
                .with_service(name)
                .with_service_id(service_id.to_string());
            self.event_store.add_event(event).await;
            self.refresh_gauge().await;
        }
        Ok(removed)
    }

    /// Every instance, optionally restricted to one `aol.service.type` label.
    pub async fn list(&self, filter_type: Option<&str>) -> Result<Vec<ServiceInstance>, RegistryError> {
        let services = self.registry.list_services().await?;
        Ok(services
            .into_values()
            .flatten()
            .filter(|i| filter_type.is_none_or(|t| i.service_type() == t))
            .collect())
    }

    /// A healthy instance when one exists, otherwise the first registered one.
    pub async fn get(&self, name: &str) -> Result<Option<ServiceInstance>, RegistryError> {
        if let Some(instance) = self.registry.get_service(name).await? {
            return Ok(Some(instance));
        }
        Ok(self.registry.get_instances(name).await?.into_iter().next())
    }

    /// Applies a self-reported status. Without a `service_id` every instance
    /// of `name` is updated. Returns the number of instances touched.
    pub async fn report_health(
        &self,
        name: &str,
        service_id: Option<ServiceId>,
        status: ServiceStatus,
    ) -> Result<usize, RegistryError> {
        let targets: Vec<ServiceId> = match service_id {
            Some(id) => vec![id],
            None => self
                .registry
                .get_instances(name)
                .await?
                .iter()
                .map(|i| i.service_id)
                .collect(),
        };

        let mut updated = 0;
        for id in targets {
            if self.registry.update_service_health(name, id, status).await? {
                updated += 1;
            }
        }

        if updated == 0 {
            return Err(RegistryError::NotFound(name.to_string()));
        }
        info!(service = %name, status = %status, instances = updated, "Health report applied");
        Ok(updated)
    }

    async fn refresh_gauge(&self) {
        if let Ok(services) = self.registry.list_services().await {
            telemetry::record_registered_services(services.values().map(Vec::len).sum());
        }
    }
}
