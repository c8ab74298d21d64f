// Copyright (c) 2026 AOL Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Integration tests for the health manager: probe-driven status changes,
//! lazy agent detection and deliberation restarts.

use aol_core::application::event_store::{EventFilter, EventStore, WorkflowState};
use aol_core::application::health_manager::HealthManager;
use aol_core::domain::config::{HealthManagementConfig, RegistryConfig};
use aol_core::domain::events::EventType;
use aol_core::domain::health::{AgentHealthStatus, HealthProbe, ProbeOutcome};
use aol_core::domain::registry::ServiceRegistry;
use aol_core::domain::service::{ServiceInstance, ServiceStatus};
use aol_core::infrastructure::event_bus::EventBus;
use aol_core::infrastructure::health_probe::HttpHealthProbe;
use aol_core::infrastructure::registry::InMemoryServiceRegistry;
use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct SwitchProbe {
    healthy: AtomicBool,
}

impl SwitchProbe {
    fn new(healthy: bool) -> Self {
        Self {
            healthy: AtomicBool::new(healthy),
        }
    }

    fn set(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }
}

#[async_trait]
impl HealthProbe for SwitchProbe {
    async fn probe(&self, _instance: &ServiceInstance) -> ProbeOutcome {
        if self.healthy.load(Ordering::SeqCst) {
            ProbeOutcome::Responded {
                healthy: true,
                status_code: 200,
                body: Some(json!({ "kind": "AOLAgent" })),
                response_time_ms: 4.0,
            }
        } else {
            ProbeOutcome::Unreachable {
                error: "connection refused".to_string(),
                response_time_ms: 1.0,
            }
        }
    }
}

fn instance(name: &str, host: &str, health_port: u16) -> ServiceInstance {
    ServiceInstance::new(
        json!({
            "apiVersion": "v1",
            "kind": "AOLAgent",
            "metadata": { "name": name, "version": "1.0.0" },
            "spec": { "endpoints": { "grpc": "50051", "health": health_port.to_string() } }
        }),
        host,
        health_port - 1,
        health_port,
        health_port + 1,
    )
}

fn manager(
    registry: Arc<InMemoryServiceRegistry>,
    store: Arc<EventStore>,
    probe: Arc<dyn HealthProbe>,
) -> HealthManager {
    let registry_config = RegistryConfig {
        health_check_interval: Duration::from_millis(20),
    };
    HealthManager::new(
        &registry_config,
        &HealthManagementConfig::default(),
        registry,
        store,
        probe,
    )
}

fn health_events_filter() -> EventFilter {
    EventFilter {
        event_type: Some(EventType::HealthChanged),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_status_transitions_emit_health_changed() {
    let registry = Arc::new(InMemoryServiceRegistry::new());
    let store = Arc::new(EventStore::new(100, EventBus::with_default_capacity()));
    let probe = Arc::new(SwitchProbe::new(true));
    registry.register(instance("planner", "10.1.0.1", 50201)).await.unwrap();
    let manager = manager(registry.clone(), store.clone(), probe.clone());

    manager.run_cycle().await;
    let current = registry.get_instances("planner").await.unwrap();
    assert_eq!(current[0].status, ServiceStatus::Healthy);

    // No change, no new event
    manager.run_cycle().await;
    assert_eq!(store.get_events(&health_events_filter(), 10).await.len(), 1);

    probe.set(false);
    manager.run_cycle().await;
    let events = store.get_events(&health_events_filter(), 10).await;
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].old_status.as_deref(), Some("starting"));
    assert_eq!(events[0].new_status.as_deref(), Some("healthy"));
    assert_eq!(events[1].old_status.as_deref(), Some("healthy"));
    assert_eq!(events[1].new_status.as_deref(), Some("unhealthy"));

    let current = registry.get_instances("planner").await.unwrap();
    assert_eq!(current[0].status, ServiceStatus::Unhealthy);

    let report = manager.agent_health_report("planner");
    assert_eq!(report.consecutive_failures, 1);
}

#[tokio::test]
async fn test_http_probe_against_live_endpoint() {
    let mut server = mockito::Server::new_async().await;
    let _health = server
        .mock("GET", "/health")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"status":"healthy","kind":"AOLService"}"#)
        .create_async()
        .await;
    let address = server.host_with_port();
    let (host, port) = address.rsplit_once(':').unwrap();
    let port: u16 = port.parse().unwrap();

    let registry = Arc::new(InMemoryServiceRegistry::new());
    let store = Arc::new(EventStore::new(100, EventBus::with_default_capacity()));
    let target = instance("gateway", host, port);
    registry.register(target.clone()).await.unwrap();

    let manager = manager(registry.clone(), store, Arc::new(HttpHealthProbe::new()));
    manager.check_service_health(&target).await;

    let current = registry.get_instances("gateway").await.unwrap();
    assert_eq!(current[0].status, ServiceStatus::Healthy);
    assert_eq!(manager.agent_health_report("gateway").contribution_count, 1);
}

#[tokio::test]
async fn test_first_health_check_seeds_response_time_after_contributions() {
    let registry = Arc::new(InMemoryServiceRegistry::new());
    let store = Arc::new(EventStore::new(100, EventBus::with_default_capacity()));
    let target = instance("scout", "10.1.0.9", 50221);
    registry.register(target.clone()).await.unwrap();
    let manager = manager(registry, store, Arc::new(SwitchProbe::new(true)));

    manager.record_agent_contribution("scout", "wf-scout", 1.0, true).await;
    manager.check_service_health(&target).await;

    let report = manager.agent_health_report("scout");
    assert_eq!(report.contribution_count, 2);
    assert_eq!(report.avg_response_time_ms, 4.0);
}

#[tokio::test]
async fn test_lazy_agents_trigger_deliberation_restart() {
    let registry = Arc::new(InMemoryServiceRegistry::new());
    let store = Arc::new(EventStore::new(500, EventBus::with_default_capacity()));
    let manager = manager(registry, store.clone(), Arc::new(SwitchProbe::new(true)));

    let agents: Vec<String> = ["lead", "idle-1", "idle-2"].iter().map(|s| s.to_string()).collect();
    store.start_workflow("debate-1", "debate", agents.clone(), None).await;
    manager.register_workflow("debate-1", agents);

    manager.record_agent_contribution("lead", "debate-1", 10.0, true).await;
    manager.record_agent_contribution("idle-1", "debate-1", 0.05, true).await;
    manager.record_agent_contribution("idle-2", "debate-1", 0.05, true).await;

    manager.run_cycle().await;

    assert_eq!(manager.agent_health_report("idle-1").health_status, AgentHealthStatus::Lazy);
    assert_eq!(manager.agent_health_report("lead").health_status, AgentHealthStatus::Healthy);

    let lazy_events = store
        .get_events(
            &EventFilter {
                event_type: Some(EventType::AgentLazyDetected),
                ..Default::default()
            },
            10,
        )
        .await;
    assert_eq!(lazy_events.len(), 2);

    let health = manager.workflow_health_report("debate-1").unwrap();
    assert_eq!(health.lazy_agents, vec!["idle-1", "idle-2"]);
    assert_eq!(health.restart_count, 1);

    let record = store.get_workflow_report("debate-1").unwrap();
    assert_eq!(record.state, Some(WorkflowState::Restarted));
    assert_eq!(record.total_contributions, 0);

    let restarts = store
        .get_events(
            &EventFilter {
                event_type: Some(EventType::DeliberationRestarted),
                ..Default::default()
            },
            10,
        )
        .await;
    assert_eq!(restarts.len(), 1);
    assert_eq!(
        restarts[0].metadata_field("reason"),
        Some(&json!("Too many lazy agents: 2/3"))
    );

    // Cooldown blocks an immediate second restart
    manager.run_cycle().await;
    assert_eq!(manager.workflow_health_report("debate-1").unwrap().restart_count, 1);

    let stats = manager.overall_health_stats();
    assert_eq!(stats.total_agents, 3);
    assert_eq!(stats.lazy_agents, 2);
    assert_eq!(stats.total_restarts, 1);
}

#[tokio::test]
async fn test_completed_workflow_is_not_restarted() {
    let registry = Arc::new(InMemoryServiceRegistry::new());
    let store = Arc::new(EventStore::new(500, EventBus::with_default_capacity()));
    let manager = manager(registry, store.clone(), Arc::new(SwitchProbe::new(true)));

    let agents: Vec<String> = ["lead", "idle-1", "idle-2"].iter().map(|s| s.to_string()).collect();
    store.start_workflow("debate-2", "debate", agents.clone(), None).await;
    manager.register_workflow("debate-2", agents);

    manager.record_agent_contribution("lead", "debate-2", 10.0, true).await;
    manager.record_agent_contribution("idle-1", "debate-2", 0.05, true).await;
    manager.record_agent_contribution("idle-2", "debate-2", 0.05, true).await;
    store.complete_workflow("debate-2", true, None).await;

    manager.run_cycle().await;

    let record = store.get_workflow_report("debate-2").unwrap();
    assert_eq!(record.state, Some(WorkflowState::Completed));
    assert_eq!(manager.workflow_health_report("debate-2").unwrap().restart_count, 0);

    assert!(manager.unregister_workflow("debate-2"));
    assert_eq!(manager.overall_health_stats().active_workflows, 0);
}

#[tokio::test]
async fn test_health_loop_stops_on_cancel() {
    let registry = Arc::new(InMemoryServiceRegistry::new());
    let store = Arc::new(EventStore::new(100, EventBus::with_default_capacity()));
    registry.register(instance("writer", "10.1.0.2", 50211)).await.unwrap();
    let manager = Arc::new(manager(registry.clone(), store.clone(), Arc::new(SwitchProbe::new(true))));

    let cancel = CancellationToken::new();
    let handle = {
        let manager = manager.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { manager.run_health_checks(cancel).await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("health loop did not stop")
        .unwrap();

    assert_eq!(store.get_events(&health_events_filter(), 10).await.len(), 1);
    assert!(registry.get_instances("writer").await.unwrap()[0].is_healthy());
}
