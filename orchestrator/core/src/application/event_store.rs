// Copyright (c) 2026 AOL Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Event Store Application Service
//!
//! Bounded in-memory event log with workflow and contribution bookkeeping.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Record system events, assign credit to agent contributions,
//!   and track the lifecycle of multi-agent workflows
//! - **Dependencies:** Domain (Events, Credit), Infrastructure (EventBus, telemetry)
//!
//! # Fan-out
//!
//! Every stored event is, in order:
//! 1. dispatched to the handlers registered for its type
//! 2. published to `service:{service_name}` when it names a service
//! 3. published to `workflow:{workflow_id}` when it belongs to a workflow
//! 4. published to `global`
//! 5. broadcast on the firehose used by WebSocket clients

use crate::domain::credit::{influence_by_agent, ActionType, AgentContribution, ShapleyCalculator, ValueFn};
use crate::domain::events::{Event, EventType};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::telemetry;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub const GLOBAL_CHANNEL: &str = "global";

// ============================================================================
// Records and reports
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowState {
    Running,
    Completed,
    Failed,
    Restarted,
}

impl WorkflowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowState::Running => "running",
            WorkflowState::Completed => "completed",
            WorkflowState::Failed => "failed",
            WorkflowState::Restarted => "restarted",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowRecord {
    pub workflow_id: String,
    #[serde(rename = "type")]
    pub workflow_type: String,
    pub agents: Vec<String>,
    pub state: WorkflowState,
    pub started_at: DateTime<Utc>,
    pub restart_count: u32,
    pub metadata: Value,
}

/// Running totals for one agent across all workflows
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AgentLedger {
    pub total_contributions: u64,
    pub successful_contributions: u64,
    pub total_influence: f64,
    pub lazy_flags: u64,
    pub restart_triggers: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentReport {
    pub agent_id: String,
    pub total_contributions: u64,
    pub successful_contributions: u64,
    pub success_rate: f64,
    pub total_influence: f64,
    pub lazy_flags: u64,
    pub restart_triggers: u64,
    pub average_influence_per_contribution: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AgentWorkflowStats {
    pub contributions: u64,
    pub influence: f64,
    pub successes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowReport {
    pub workflow_id: String,
    #[serde(rename = "type")]
    pub workflow_type: Option<String>,
    pub state: Option<WorkflowState>,
    pub agents: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub restart_count: u32,
    pub total_contributions: usize,
    pub agent_stats: BTreeMap<String, AgentWorkflowStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventStats {
    pub total_events: usize,
    pub by_type: BTreeMap<String, usize>,
    pub recent_events: usize,
    pub active_workflows: usize,
    pub completed_workflows: usize,
    pub failed_workflows: usize,
    pub agent_count: usize,
    pub total_contributions: u64,
    pub lazy_agent_flags: u64,
}

#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub event_type: Option<EventType>,
    /// Matches the event's subject, caller or callee
    pub service_name: Option<String>,
    pub workflow_id: Option<String>,
}

impl EventFilter {
    fn matches(&self, event: &Event) -> bool {
        self.event_type.is_none_or(|t| event.event_type == t)
            && self
                .service_name
                .as_deref()
                .is_none_or(|name| event.involves_service(name))
            && self
                .workflow_id
                .as_deref()
                .is_none_or(|id| event.workflow_id.as_deref() == Some(id))
    }
}

#[derive(Default)]
struct Ledger {
    contributions: HashMap<String, Vec<AgentContribution>>,
    workflows: HashMap<String, WorkflowRecord>,
    agents: HashMap<String, AgentLedger>,
}

// ============================================================================
// EventStore
// ============================================================================

pub struct EventStore {
    max_events: usize,
    events: RwLock<VecDeque<Event>>,
    ledger: Mutex<Ledger>,
    bus: EventBus,
}

impl EventStore {
    pub fn new(max_events: usize, bus: EventBus) -> Self {
        Self {
            max_events: max_events.max(1),
            events: RwLock::new(VecDeque::with_capacity(max_events.min(4096))),
            ledger: Mutex::new(Ledger::default()),
            bus,
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn capacity(&self) -> usize {
        self.max_events
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }

    /// Stores an event and fans it out to handlers, channels and the firehose.
    pub async fn add_event(&self, event: Event) {
        {
            let mut events = self.events.write().await;
            events.push_back(event.clone());
            while events.len() > self.max_events {
                events.pop_front();
            }
        }
        telemetry::record_event(event.event_type.as_str());
        debug!(event_type = %event.event_type, event_id = %event.event_id, "Stored event");

        self.bus.dispatch(&event).await;

        if let Some(service) = &event.service_name {
            self.bus.publish(&format!("service:{service}"), &event).await;
        }
        if let Some(workflow_id) = &event.workflow_id {
            self.bus.publish(&format!("workflow:{workflow_id}"), &event).await;
        }
        self.bus.publish(GLOBAL_CHANNEL, &event).await;
        self.bus.broadcast(&event);
    }

    // ========================================================================
    // Credit assignment
    // ========================================================================

    /// Records one agent turn and assigns its influence score.
    ///
    /// With a value function the score is the agent's Shapley value over the
    /// agents already contributing to the workflow plus itself. Without one it
    /// is the action weight for a successful turn and zero otherwise.
    #[allow(clippy::too_many_arguments)]
    pub async fn record_contribution(
        &self,
        agent_id: &str,
        workflow_id: &str,
        turn_number: u32,
        action_type: ActionType,
        latency_ms: f64,
        success: bool,
        value_fn: Option<&ValueFn>,
    ) -> AgentContribution {
        let weighted = if success { action_type.weight() } else { 0.0 };
        let influence_score = match value_fn {
            Some(value_fn) => {
                let mut agents: Vec<String> = self
                    .ledger
                    .lock()
                    .contributions
                    .get(workflow_id)
                    .map(|cs| cs.iter().map(|c| c.agent_id.clone()).collect())
                    .unwrap_or_default();
                agents.push(agent_id.to_string());
                match ShapleyCalculator::marginal_contribution(agent_id, &agents, value_fn) {
                    Ok(phi) => phi,
                    Err(e) => {
                        warn!(workflow_id = %workflow_id, error = %e, "Falling back to action weight");
                        weighted
                    }
                }
            }
            None => weighted,
        };

        let contribution = {
            let mut ledger = self.ledger.lock();
            let contribution = AgentContribution {
                agent_id: agent_id.to_string(),
                workflow_id: workflow_id.to_string(),
                turn_number,
                action_type: action_type.clone(),
                latency_ms,
                success,
                influence_score,
                timestamp: Utc::now(),
            };
            ledger
                .contributions
                .entry(workflow_id.to_string())
                .or_default()
                .push(contribution.clone());

            let agent = ledger.agents.entry(agent_id.to_string()).or_default();
            agent.total_contributions += 1;
            if success {
                agent.successful_contributions += 1;
            }
            agent.total_influence += influence_score;

            contribution
        };

        let event = Event::new(EventType::AgentContribution)
            .with_service(agent_id)
            .with_workflow(workflow_id)
            .with_contribution_score(contribution.influence_score)
            .with_success(success)
            .with_metadata(json!({
                "turn_number": turn_number,
                "action_type": action_type.as_str(),
                "latency_ms": latency_ms,
            }));
        self.add_event(event).await;

        contribution
    }

    /// Flags agents whose share of the workflow's influence is below `threshold`.
    pub async fn check_lazy_agents(&self, workflow_id: &str, threshold: f64) -> Vec<String> {
        let flagged: Vec<(String, u64)> = {
            let mut ledger = self.ledger.lock();
            let lazy = ledger
                .contributions
                .get(workflow_id)
                .map(|cs| ShapleyCalculator::detect_lazy_agents(cs, threshold))
                .unwrap_or_default();
            lazy.into_iter()
                .map(|agent_id| {
                    let agent = ledger.agents.entry(agent_id.clone()).or_default();
                    agent.lazy_flags += 1;
                    let count = agent.lazy_flags;
                    (agent_id, count)
                })
                .collect()
        };

        for (agent_id, lazy_count) in &flagged {
            let event = Event::new(EventType::AgentLazyDetected)
                .with_service(agent_id.as_str())
                .with_workflow(workflow_id)
                .with_metadata(json!({ "threshold": threshold, "lazy_count": lazy_count }));
            self.add_event(event).await;
        }

        flagged.into_iter().map(|(agent_id, _)| agent_id).collect()
    }

    /// Discards the workflow's contributions so deliberation starts over.
    pub async fn trigger_deliberation_restart(&self, workflow_id: &str, reason: &str) {
        let (previous_state, discarded) = {
            let mut ledger = self.ledger.lock();
            let previous_state = ledger
                .workflows
                .get(workflow_id)
                .map(|w| w.state.as_str())
                .unwrap_or("unknown");
            let discarded = ledger.contributions.remove(workflow_id).unwrap_or_default();

            for contribution in &discarded {
                ledger
                    .agents
                    .entry(contribution.agent_id.clone())
                    .or_default()
                    .restart_triggers += 1;
            }
            if let Some(workflow) = ledger.workflows.get_mut(workflow_id) {
                workflow.state = WorkflowState::Restarted;
                workflow.restart_count += 1;
            }
            (previous_state, discarded.len())
        };

        info!(workflow_id = %workflow_id, reason = %reason, discarded, "Deliberation restarted");

        let event = Event::new(EventType::DeliberationRestarted)
            .with_workflow(workflow_id)
            .with_metadata(json!({
                "reason": reason,
                "previous_state": previous_state,
                "contributions_discarded": discarded,
            }));
        self.add_event(event).await;
    }

    // ========================================================================
    // Workflow lifecycle
    // ========================================================================

    pub async fn start_workflow(
        &self,
        workflow_id: &str,
        workflow_type: &str,
        agents: Vec<String>,
        metadata: Option<Value>,
    ) {
        let metadata = metadata.unwrap_or_else(|| Value::Object(Map::new()));

        let mut event_metadata = Map::new();
        event_metadata.insert("workflow_type".into(), json!(workflow_type));
        event_metadata.insert("agents".into(), json!(agents));
        if let Value::Object(extra) = &metadata {
            event_metadata.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        self.ledger.lock().workflows.insert(
            workflow_id.to_string(),
            WorkflowRecord {
                workflow_id: workflow_id.to_string(),
                workflow_type: workflow_type.to_string(),
                agents,
                state: WorkflowState::Running,
                started_at: Utc::now(),
                restart_count: 0,
                metadata,
            },
        );

        let event = Event::new(EventType::WorkflowStarted)
            .with_workflow(workflow_id)
            .with_metadata(Value::Object(event_metadata));
        self.add_event(event).await;
    }

    pub async fn complete_workflow(&self, workflow_id: &str, success: bool, result: Option<Value>) {
        let metadata = {
            let mut ledger = self.ledger.lock();
            let contributions = ledger.contributions.get(workflow_id).map(Vec::as_slice).unwrap_or(&[]);
            let final_credits = influence_by_agent(contributions);
            let total_contributions = contributions.len();

            let (started_at, restart_count) = match ledger.workflows.get_mut(workflow_id) {
                Some(workflow) => {
                    workflow.state = if success {
                        WorkflowState::Completed
                    } else {
                        WorkflowState::Failed
                    };
                    (workflow.started_at, workflow.restart_count)
                }
                None => (Utc::now(), 0),
            };
            let duration_seconds = (Utc::now() - started_at).num_milliseconds() as f64 / 1000.0;

            json!({
                "duration_seconds": duration_seconds,
                "total_contributions": total_contributions,
                "restart_count": restart_count,
                "final_credits": final_credits,
                "result": result,
            })
        };

        let event_type = if success {
            EventType::WorkflowCompleted
        } else {
            EventType::WorkflowFailed
        };
        let event = Event::new(event_type)
            .with_workflow(workflow_id)
            .with_success(success)
            .with_metadata(metadata);
        self.add_event(event).await;
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// The last `limit` matching events, oldest first.
    pub async fn get_events(&self, filter: &EventFilter, limit: usize) -> Vec<Event> {
        let events = self.events.read().await;
        let mut matched: Vec<Event> = events
            .iter()
            .rev()
            .filter(|e| filter.matches(e))
            .take(limit)
            .cloned()
            .collect();
        matched.reverse();
        matched
    }

    pub async fn get_route_events(
        &self,
        source: Option<&str>,
        target: Option<&str>,
        limit: usize,
    ) -> Vec<Event> {
        let events = self.events.read().await;
        let mut matched: Vec<Event> = events
            .iter()
            .rev()
            .filter(|e| e.event_type == EventType::RouteCalled)
            .filter(|e| source.is_none_or(|s| e.source_service.as_deref() == Some(s)))
            .filter(|e| target.is_none_or(|t| e.target_service.as_deref() == Some(t)))
            .take(limit)
            .cloned()
            .collect();
        matched.reverse();
        matched
    }

    pub async fn events_since(&self, cutoff: DateTime<Utc>) -> Vec<Event> {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.timestamp > cutoff)
            .cloned()
            .collect()
    }

    pub async fn get_stats(&self) -> EventStats {
        let (total_events, by_type, recent_events) = {
            let events = self.events.read().await;
            let mut by_type: BTreeMap<String, usize> =
                EventType::ALL.iter().map(|t| (t.as_str().to_string(), 0)).collect();
            for event in events.iter() {
                *by_type.entry(event.event_type.as_str().to_string()).or_insert(0) += 1;
            }
            let hour_ago = Utc::now() - ChronoDuration::hours(1);
            let recent = events.iter().filter(|e| e.timestamp > hour_ago).count();
            (events.len(), by_type, recent)
        };

        let ledger = self.ledger.lock();
        let count_state = |state: WorkflowState| ledger.workflows.values().filter(|w| w.state == state).count();

        EventStats {
            total_events,
            by_type,
            recent_events,
            active_workflows: count_state(WorkflowState::Running),
            completed_workflows: count_state(WorkflowState::Completed),
            failed_workflows: count_state(WorkflowState::Failed),
            agent_count: ledger.agents.len(),
            total_contributions: ledger.agents.values().map(|a| a.total_contributions).sum(),
            lazy_agent_flags: ledger.agents.values().map(|a| a.lazy_flags).sum(),
        }
    }

    /// Report for `agent_id`; an unknown agent reports zeros.
    pub fn get_agent_report(&self, agent_id: &str) -> AgentReport {
        let ledger = self.ledger.lock();
        let agent = ledger.agents.get(agent_id).copied().unwrap_or_default();
        let denominator = agent.total_contributions.max(1) as f64;

        AgentReport {
            agent_id: agent_id.to_string(),
            total_contributions: agent.total_contributions,
            successful_contributions: agent.successful_contributions,
            success_rate: agent.successful_contributions as f64 / denominator,
            total_influence: agent.total_influence,
            lazy_flags: agent.lazy_flags,
            restart_triggers: agent.restart_triggers,
            average_influence_per_contribution: agent.total_influence / denominator,
        }
    }

    /// Ids of every agent that has contributed at least once.
    pub fn known_agents(&self) -> Vec<String> {
        let mut agents: Vec<String> = self.ledger.lock().agents.keys().cloned().collect();
        agents.sort();
        agents
    }

    /// `None` when the workflow was never started and has no contributions.
    pub fn get_workflow_report(&self, workflow_id: &str) -> Option<WorkflowReport> {
        let ledger = self.ledger.lock();
        Self::workflow_report(&ledger, workflow_id)
    }

    pub fn list_workflow_reports(&self) -> Vec<WorkflowReport> {
        let ledger = self.ledger.lock();
        let mut reports: Vec<WorkflowReport> = ledger
            .workflows
            .keys()
            .filter_map(|id| Self::workflow_report(&ledger, id))
            .collect();
        reports.sort_by_key(|r| r.started_at);
        reports
    }

    pub fn workflow_contributions(&self, workflow_id: &str) -> Vec<AgentContribution> {
        self.ledger
            .lock()
            .contributions
            .get(workflow_id)
            .cloned()
            .unwrap_or_default()
    }

    fn workflow_report(ledger: &Ledger, workflow_id: &str) -> Option<WorkflowReport> {
        let workflow = ledger.workflows.get(workflow_id);
        let contributions = ledger.contributions.get(workflow_id);
        if workflow.is_none() && contributions.is_none() {
            return None;
        }
        let contributions = contributions.map(Vec::as_slice).unwrap_or(&[]);

        let mut agent_stats: BTreeMap<String, AgentWorkflowStats> = BTreeMap::new();
        for contribution in contributions {
            let stats = agent_stats.entry(contribution.agent_id.clone()).or_default();
            stats.contributions += 1;
            stats.influence += contribution.influence_score;
            if contribution.success {
                stats.successes += 1;
            }
        }

        Some(WorkflowReport {
            workflow_id: workflow_id.to_string(),
            workflow_type: workflow.map(|w| w.workflow_type.clone()),
            state: workflow.map(|w| w.state),
            agents: workflow.map(|w| w.agents.clone()).unwrap_or_default(),
            started_at: workflow.map(|w| w.started_at),
            restart_count: workflow.map(|w| w.restart_count).unwrap_or(0),
            total_contributions: contributions.len(),
            agent_stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::credit::{Coalition, MAX_SHAPLEY_PLAYERS};
    use std::sync::Arc;

    fn store(max_events: usize) -> EventStore {
        EventStore::new(max_events, EventBus::with_default_capacity())
    }

    #[tokio::test]
    async fn test_event_log_is_bounded() {
        let store = store(3);
        for _ in 0..5 {
            store.add_event(Event::new(EventType::RouteCalled)).await;
        }
        store.add_event(Event::new(EventType::HealthChanged)).await;
        assert_eq!(store.len().await, 3);

        let last = store.get_events(&EventFilter::default(), 10).await;
        assert_eq!(last.last().unwrap().event_type, EventType::HealthChanged);
    }

    #[tokio::test]
    async fn test_default_influence_uses_action_weight() {
        let store = store(100);
        let ok = store
            .record_contribution("planner", "wf", 1, ActionType::Decision, 10.0, true, None)
            .await;
        let failed = store
            .record_contribution("planner", "wf", 2, ActionType::Decision, 10.0, false, None)
            .await;
        assert_eq!(ok.influence_score, 1.5);
        assert_eq!(failed.influence_score, 0.0);

        let report = store.get_agent_report("planner");
        assert_eq!(report.total_contributions, 2);
        assert_eq!(report.success_rate, 0.5);
        assert_eq!(report.average_influence_per_contribution, 0.75);
    }

    #[tokio::test]
    async fn test_value_function_influence() {
        let store = store(100);
        let value_fn: &ValueFn = &|c: &Coalition| c.len() as f64;
        store
            .record_contribution("a", "wf", 1, ActionType::Reasoning, 1.0, true, Some(value_fn))
            .await;
        let second = store
            .record_contribution("b", "wf", 2, ActionType::Reasoning, 1.0, true, Some(value_fn))
            .await;
        // Additive game: every agent's Shapley value is 1.
        assert!((second.influence_score - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_value_function_may_read_the_store() {
        let store = Arc::new(store(100));
        store
            .record_contribution("a", "wf", 1, ActionType::Reasoning, 1.0, true, None)
            .await;

        let reader = store.clone();
        let value_fn: &ValueFn = &move |c: &Coalition| {
            c.len() as f64 * reader.workflow_contributions("wf").len() as f64
        };
        let second = store
            .record_contribution("b", "wf", 2, ActionType::Reasoning, 1.0, true, Some(value_fn))
            .await;
        assert!((second.influence_score - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_oversized_coalition_falls_back_to_action_weight() {
        let store = store(500);
        for i in 0..MAX_SHAPLEY_PLAYERS {
            store
                .record_contribution(&format!("agent-{i}"), "wf", 1, ActionType::Reasoning, 1.0, true, None)
                .await;
        }
        let value_fn: &ValueFn = &|c: &Coalition| c.len() as f64;
        let late = store
            .record_contribution("late", "wf", 1, ActionType::Decision, 1.0, true, Some(value_fn))
            .await;
        assert_eq!(late.influence_score, 1.5);
    }

    #[tokio::test]
    async fn test_unknown_agent_report_is_zeroed() {
        let report = store(10).get_agent_report("ghost");
        assert_eq!(report.total_contributions, 0);
        assert_eq!(report.success_rate, 0.0);
    }

    #[tokio::test]
    async fn test_restart_discards_contributions() {
        let store = store(100);
        store
            .start_workflow("wf", "debate", vec!["a".into(), "b".into()], None)
            .await;
        store
            .record_contribution("a", "wf", 1, ActionType::Reasoning, 1.0, true, None)
            .await;
        store.trigger_deliberation_restart("wf", "imbalance").await;

        let report = store.get_workflow_report("wf").unwrap();
        assert_eq!(report.state, Some(WorkflowState::Restarted));
        assert_eq!(report.restart_count, 1);
        assert_eq!(report.total_contributions, 0);
        assert_eq!(store.get_agent_report("a").restart_triggers, 1);
        assert_eq!(store.get_agent_report("b").restart_triggers, 0);

        let events = store
            .get_events(
                &EventFilter {
                    event_type: Some(EventType::DeliberationRestarted),
                    ..Default::default()
                },
                10,
            )
            .await;
        assert_eq!(events[0].metadata_field("previous_state"), Some(&json!("running")));
        assert_eq!(events[0].metadata_field("contributions_discarded"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn test_unknown_workflow_has_no_report() {
        assert!(store(10).get_workflow_report("missing").is_none());
    }

    #[tokio::test]
    async fn test_stats_cover_every_event_type() {
        let store = store(10);
        store.add_event(Event::new(EventType::RouteCalled)).await;
        let stats = store.get_stats().await;
        assert_eq!(stats.by_type.len(), EventType::ALL.len());
        assert_eq!(stats.by_type["route_called"], 1);
        assert_eq!(stats.recent_events, 1);
    }
}
