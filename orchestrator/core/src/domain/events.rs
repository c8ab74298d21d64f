// Copyright (c) 2026 AOL Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Domain Events
//!
//! Every interaction the core observes is captured as an [`Event`]: service
//! registrations, health transitions, routed calls, agent contributions and
//! workflow lifecycle changes. Events are immutable once created and are the
//! unit stored by the event store and streamed to WebSocket clients.
//!
//! # Architecture
//!
//! - **Layer:** Domain
//! - **Purpose:** Event vocabulary shared by every bounded context

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ServiceRegistered,
    ServiceDeregistered,
    HealthChanged,
    RouteCalled,
    ServiceDiscovered,
    AgentContribution,
    WorkflowStarted,
    WorkflowCompleted,
    WorkflowFailed,
    DeliberationStarted,
    DeliberationRestarted,
    AgentLazyDetected,
}

impl EventType {
    pub const ALL: [EventType; 12] = [
        EventType::ServiceRegistered,
        EventType::ServiceDeregistered,
        EventType::HealthChanged,
        EventType::RouteCalled,
        EventType::ServiceDiscovered,
        EventType::AgentContribution,
        EventType::WorkflowStarted,
        EventType::WorkflowCompleted,
        EventType::WorkflowFailed,
        EventType::DeliberationStarted,
        EventType::DeliberationRestarted,
        EventType::AgentLazyDetected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ServiceRegistered => "service_registered",
            EventType::ServiceDeregistered => "service_deregistered",
            EventType::HealthChanged => "health_changed",
            EventType::RouteCalled => "route_called",
            EventType::ServiceDiscovered => "service_discovered",
            EventType::AgentContribution => "agent_contribution",
            EventType::WorkflowStarted => "workflow_started",
            EventType::WorkflowCompleted => "workflow_completed",
            EventType::WorkflowFailed => "workflow_failed",
            EventType::DeliberationStarted => "deliberation_started",
            EventType::DeliberationRestarted => "deliberation_restarted",
            EventType::AgentLazyDetected => "agent_lazy_detected",
        }
    }

    /// Event types that count as failures regardless of their `success` flag.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            EventType::WorkflowFailed | EventType::AgentLazyDetected | EventType::DeliberationRestarted
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown event type '{s}'"))
    }
}

/// A single recorded occurrence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contribution_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
}

impl Event {
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            event_type,
            timestamp: Utc::now(),
            service_name: None,
            service_id: None,
            source_service: None,
            target_service: None,
            method: None,
            success: None,
            old_status: None,
            new_status: None,
            metadata: None,
            contribution_score: None,
            workflow_id: None,
        }
    }

    pub fn with_service(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    pub fn with_service_id(mut self, id: impl Into<String>) -> Self {
        self.service_id = Some(id.into());
        self
    }

    pub fn with_route(mut self, source: impl Into<String>, target: impl Into<String>, method: impl Into<String>) -> Self {
        self.source_service = Some(source.into());
        self.target_service = Some(target.into());
        self.method = Some(method.into());
        self
    }

    pub fn with_success(mut self, success: bool) -> Self {
        self.success = Some(success);
        self
    }

    pub fn with_status_change(mut self, old: impl Into<String>, new: impl Into<String>) -> Self {
        self.old_status = Some(old.into());
        self.new_status = Some(new.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_contribution_score(mut self, score: f64) -> Self {
        self.contribution_score = Some(score);
        self
    }

    pub fn with_workflow(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    /// True when this event involves the service as subject, caller or callee.
    pub fn involves_service(&self, name: &str) -> bool {
        [&self.service_name, &self.source_service, &self.target_service]
            .iter()
            .any(|s| s.as_deref() == Some(name))
    }

    pub fn is_failure(&self) -> bool {
        self.success == Some(false) || self.event_type.is_failure()
    }

    pub fn metadata_field(&self, key: &str) -> Option<&Value> {
        self.metadata.as_ref().and_then(|m| m.get(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_type_names_parse_back() {
        for event_type in EventType::ALL {
            assert_eq!(event_type.as_str().parse::<EventType>().unwrap(), event_type);
            assert_eq!(
                serde_json::to_value(event_type).unwrap(),
                json!(event_type.as_str())
            );
        }
        assert!("service_exploded".parse::<EventType>().is_err());
    }

    #[test]
    fn test_event_json_omits_unset_fields() {
        let event = Event::new(EventType::RouteCalled)
            .with_route("planner", "executor", "Execute")
            .with_success(true);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event_type"], "route_called");
        assert_eq!(value["source_service"], "planner");
        assert!(value.get("workflow_id").is_none());
    }

    #[test]
    fn test_involves_service_checks_all_roles() {
        let event = Event::new(EventType::RouteCalled).with_route("a", "b", "M");
        assert!(event.involves_service("a"));
        assert!(event.involves_service("b"));
        assert!(!event.involves_service("c"));
    }

    #[test]
    fn test_failure_classification() {
        assert!(Event::new(EventType::RouteCalled).with_success(false).is_failure());
        assert!(Event::new(EventType::WorkflowFailed).is_failure());
        assert!(!Event::new(EventType::HealthChanged).is_failure());
    }
}
