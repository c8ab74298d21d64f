// Copyright (c) 2026 AOL Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Analysis Application Service
//!
//! Failure breakdowns and rule-based insights over the event store and the
//! registry.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Derive operator-facing diagnostics from recorded events
//! - **Dependencies:** EventStore, Domain (ServiceRegistry)

use crate::application::event_store::EventStore;
use crate::domain::registry::{RegistryError, ServiceRegistry};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

const PROBLEMATIC_AGENT_LIMIT: usize = 10;
const LAZY_FLAG_WARNING: u64 = 5;
const WORKFLOW_FAILURE_CRITICAL: f64 = 0.2;
const UNHEALTHY_SERVICE_WARNING: f64 = 0.1;
const STORE_PRESSURE_RATIO: f64 = 0.9;

// ============================================================================
// Reports
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ProblematicAgent {
    pub agent: String,
    pub failure_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailureAnalysis {
    pub period_hours: i64,
    pub total_failures: usize,
    pub by_type: BTreeMap<String, usize>,
    pub by_agent: BTreeMap<String, usize>,
    pub by_workflow: BTreeMap<String, usize>,
    pub problematic_agents: Vec<ProblematicAgent>,
    pub failure_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightSeverity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct Insight {
    pub severity: InsightSeverity,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub recommendation: String,
}

impl Insight {
    fn new(severity: InsightSeverity, kind: &str, message: String, recommendation: &str) -> Self {
        Self {
            severity,
            kind: kind.to_string(),
            message,
            recommendation: recommendation.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InsightsReport {
    pub generated_at: DateTime<Utc>,
    pub insights: Vec<Insight>,
    pub system_healthy: bool,
}

// ============================================================================
// AnalysisService
// ============================================================================

pub struct AnalysisService {
    event_store: Arc<EventStore>,
    registry: Arc<dyn ServiceRegistry>,
}

impl AnalysisService {
    pub fn new(event_store: Arc<EventStore>, registry: Arc<dyn ServiceRegistry>) -> Self {
        Self { event_store, registry }
    }

    /// Failures recorded in the last `hours`. The rate is taken against every
    /// event currently held by the store.
    pub async fn failure_analysis(&self, hours: i64) -> FailureAnalysis {
        let cutoff = Utc::now() - ChronoDuration::hours(hours);
        let failures: Vec<_> = self
            .event_store
            .events_since(cutoff)
            .await
            .into_iter()
            .filter(|e| e.is_failure())
            .collect();

        let mut by_type = BTreeMap::new();
        let mut by_agent = BTreeMap::new();
        let mut by_workflow = BTreeMap::new();
        for event in &failures {
            *by_type.entry(event.event_type.as_str().to_string()).or_insert(0) += 1;
            if let Some(service) = &event.service_name {
                *by_agent.entry(service.clone()).or_insert(0) += 1;
            }
            if let Some(workflow) = &event.workflow_id {
                *by_workflow.entry(workflow.clone()).or_insert(0) += 1;
            }
        }

        let mut ranked: Vec<(&String, &usize)> = by_agent.iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(a.1));
        let problematic_agents = ranked
            .into_iter()
            .take(PROBLEMATIC_AGENT_LIMIT)
            .map(|(agent, count)| ProblematicAgent {
                agent: agent.clone(),
                failure_count: *count,
            })
            .collect();

        let total = self.event_store.len().await;
        FailureAnalysis {
            period_hours: hours,
            total_failures: failures.len(),
            failure_rate: failures.len() as f64 / total.max(1) as f64,
            by_type,
            by_agent,
            by_workflow,
            problematic_agents,
        }
    }

    pub async fn insights(&self) -> Result<InsightsReport, RegistryError> {
        let stats = self.event_store.get_stats().await;
        let mut insights = Vec::new();

        if stats.lazy_agent_flags > LAZY_FLAG_WARNING {
            insights.push(Insight::new(
                InsightSeverity::Warning,
                "lazy_agents",
                format!(
                    "Multiple lazy agents detected ({} flags). Consider reviewing agent configurations.",
                    stats.lazy_agent_flags
                ),
                "Review agent contribution thresholds and consider enabling auto-recovery.",
            ));
        }

        let failed = stats.failed_workflows;
        let finished = failed + stats.completed_workflows;
        if stats.completed_workflows > 0 {
            let rate = failed as f64 / finished as f64;
            if rate > WORKFLOW_FAILURE_CRITICAL {
                insights.push(Insight::new(
                    InsightSeverity::Critical,
                    "high_failure_rate",
                    format!(
                        "High workflow failure rate: {failed}/{finished} ({:.1}%)",
                        rate * 100.0
                    ),
                    "Review workflow configurations and check for resource constraints.",
                ));
            }
        }

        let services = self.registry.list_services().await?;
        let total_services: usize = services.values().map(Vec::len).sum();
        let unhealthy = services.values().flatten().filter(|i| !i.is_healthy()).count();
        if total_services > 0 && unhealthy as f64 / total_services as f64 > UNHEALTHY_SERVICE_WARNING {
            insights.push(Insight::new(
                InsightSeverity::Warning,
                "service_health",
                format!("{unhealthy}/{total_services} services are unhealthy."),
                "Check service logs and resource availability.",
            ));
        }

        if stats.total_events as f64 > self.event_store.capacity() as f64 * STORE_PRESSURE_RATIO {
            insights.push(Insight::new(
                InsightSeverity::Info,
                "event_store_pressure",
                "Event store approaching capacity limit.".to_string(),
                "Consider raising eventStore.maxEvents or exporting events to external storage.",
            ));
        }

        Ok(InsightsReport {
            generated_at: Utc::now(),
            insights,
            system_healthy: stats.lazy_agent_flags == 0 && unhealthy == 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::{Event, EventType};
    use crate::domain::service::{ServiceInstance, ServiceStatus};
    use crate::infrastructure::event_bus::EventBus;
    use crate::infrastructure::registry::InMemoryServiceRegistry;
    use serde_json::json;

    fn fixture(capacity: usize) -> (AnalysisService, Arc<EventStore>, Arc<InMemoryServiceRegistry>) {
        let store = Arc::new(EventStore::new(capacity, EventBus::with_default_capacity()));
        let registry = Arc::new(InMemoryServiceRegistry::new());
        let service = AnalysisService::new(store.clone(), registry.clone());
        (service, store, registry)
    }

    fn instance(name: &str, port: u16) -> ServiceInstance {
        ServiceInstance::new(
            json!({"apiVersion": "v1", "kind": "AOLAgent", "metadata": {"name": name}, "spec": {}}),
            "localhost",
            port,
            port + 1,
            port + 2,
        )
    }

    #[tokio::test]
    async fn test_failure_analysis_classifies_and_ranks() {
        let (service, store, _) = fixture(100);
        store
            .add_event(Event::new(EventType::RouteCalled).with_service("search").with_success(false))
            .await;
        store
            .add_event(Event::new(EventType::RouteCalled).with_service("search").with_success(false))
            .await;
        store
            .add_event(Event::new(EventType::AgentLazyDetected).with_service("critic").with_workflow("wf-1"))
            .await;
        store
            .add_event(Event::new(EventType::RouteCalled).with_service("search").with_success(true))
            .await;

        let analysis = service.failure_analysis(24).await;
        assert_eq!(analysis.total_failures, 3);
        assert_eq!(analysis.by_type.get("route_called"), Some(&2));
        assert_eq!(analysis.by_workflow.get("wf-1"), Some(&1));
        assert_eq!(analysis.problematic_agents[0].agent, "search");
        assert_eq!(analysis.problematic_agents[0].failure_count, 2);
        assert!((analysis.failure_rate - 0.75).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_failure_rate_on_empty_store_is_zero() {
        let (service, _, _) = fixture(100);
        let analysis = service.failure_analysis(1).await;
        assert_eq!(analysis.total_failures, 0);
        assert_eq!(analysis.failure_rate, 0.0);
    }

    #[tokio::test]
    async fn test_healthy_system_has_no_insights() {
        let (service, _, registry) = fixture(100);
        let id = registry.register(instance("planner", 50060)).await.unwrap();
        registry
            .update_service_health("planner", id, ServiceStatus::Healthy)
            .await
            .unwrap();

        let report = service.insights().await.unwrap();
        assert!(report.insights.is_empty());
        assert!(report.system_healthy);
    }

    #[tokio::test]
    async fn test_unhealthy_services_raise_warning() {
        let (service, _, registry) = fixture(100);
        registry.register(instance("planner", 50060)).await.unwrap();

        let report = service.insights().await.unwrap();
        assert!(!report.system_healthy);
        let insight = report.insights.iter().find(|i| i.kind == "service_health").unwrap();
        assert_eq!(insight.severity, InsightSeverity::Warning);
        assert_eq!(insight.message, "1/1 services are unhealthy.");
    }

    #[tokio::test]
    async fn test_workflow_failure_rate_is_critical() {
        let (service, store, _) = fixture(100);
        for (id, success) in [("a", true), ("b", false), ("c", false)] {
            store.start_workflow(id, "deliberation", vec!["x".to_string()], None).await;
            store.complete_workflow(id, success, None).await;
        }

        let report = service.insights().await.unwrap();
        let insight = report.insights.iter().find(|i| i.kind == "high_failure_rate").unwrap();
        assert_eq!(insight.severity, InsightSeverity::Critical);
        assert!(insight.message.contains("2/3"));
    }

    #[tokio::test]
    async fn test_store_pressure_is_informational() {
        let (service, store, _) = fixture(10);
        for _ in 0..10 {
            store.add_event(Event::new(EventType::ServiceDiscovered)).await;
        }
        let report = service.insights().await.unwrap();
        let insight = report
            .insights
            .iter()
            .find(|i| i.kind == "event_store_pressure")
            .unwrap();
        assert_eq!(insight.severity, InsightSeverity::Info);
    }
}
