// Copyright (c) 2026 AOL Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Health Manager Application Service
//!
//! Periodic service health probing plus multi-agent health analysis: lazy and
//! dominant agent detection over a sliding window of influence scores, and
//! automatic deliberation restarts for workflows whose agent dynamics degrade.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Keep registry status current and recover unhealthy workflows
//! - **Dependencies:** Domain (Health, Registry), Application (EventStore)
//!
//! # Health Cycle
//!
//! Every `healthCheckInterval`:
//! 1. probe every registered instance and update its registry status
//! 2. when lazy detection is enabled, re-classify every known agent
//! 3. re-score registered workflows and, with auto-recovery, restart them
//!
//! Failures inside a cycle are logged and never stop the loop.

use crate::application::event_store::{EventStore, WorkflowState};
use crate::domain::config::{HealthManagementConfig, RegistryConfig};
use crate::domain::credit::ActionType;
use crate::domain::events::{Event, EventType};
use crate::domain::health::{
    AgentHealthStatus, AgentPerformanceMetrics, HealthProbe, ProbeOutcome, WorkflowHealth,
};
use crate::domain::registry::ServiceRegistry;
use crate::domain::service::{ServiceId, ServiceInstance, ServiceStatus};
use crate::infrastructure::telemetry;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Health-endpoint `kind` values that identify agent-like services.
const AGENT_KINDS: [&str; 2] = ["AOLAgent", "AOLService"];

const DOMINANCE_SHARE: f64 = 0.7;
const LOW_HEALTH_SCORE: f64 = 0.3;
const LAZY_SHARE_THRESHOLD: f64 = 0.5;

// ============================================================================
// LazyAgentDetector
// ============================================================================

/// Classifies agents by their recent influence relative to their peers
#[derive(Debug, Clone)]
pub struct LazyAgentDetector {
    lazy_threshold: f64,
    window_size: usize,
    history: HashMap<String, VecDeque<f64>>,
}

impl LazyAgentDetector {
    pub fn new(lazy_threshold: f64, window_size: usize) -> Self {
        Self {
            lazy_threshold,
            window_size: window_size.max(1),
            history: HashMap::new(),
        }
    }

    pub fn record_contribution(&mut self, agent_id: &str, influence_score: f64) {
        let history = self.history.entry(agent_id.to_string()).or_default();
        history.push_back(influence_score);
        while history.len() > self.window_size {
            history.pop_front();
        }
    }

    fn average(history: &VecDeque<f64>) -> Option<f64> {
        if history.is_empty() {
            return None;
        }
        Some(history.iter().sum::<f64>() / history.len() as f64)
    }

    pub fn analyze_agent(&self, agent_id: &str) -> AgentHealthStatus {
        let Some(agent_avg) = self.history.get(agent_id).and_then(Self::average) else {
            return AgentHealthStatus::Starting;
        };

        let averages: Vec<f64> = self.history.values().filter_map(Self::average).collect();
        let global_avg = averages.iter().sum::<f64>() / averages.len() as f64;
        if global_avg <= 0.0 {
            return AgentHealthStatus::Healthy;
        }

        let relative = agent_avg / global_avg;
        if relative < self.lazy_threshold {
            AgentHealthStatus::Lazy
        } else if relative > 1.0 / self.lazy_threshold {
            AgentHealthStatus::Dominant
        } else if relative < 0.5 {
            AgentHealthStatus::Degraded
        } else {
            AgentHealthStatus::Healthy
        }
    }

    pub fn lazy_agents(&self, agents: &[String]) -> Vec<String> {
        agents
            .iter()
            .filter(|a| self.analyze_agent(a) == AgentHealthStatus::Lazy)
            .cloned()
            .collect()
    }

    pub fn dominant_agent(&self, agents: &[String]) -> Option<String> {
        agents
            .iter()
            .find(|a| self.analyze_agent(a) == AgentHealthStatus::Dominant)
            .cloned()
    }
}

// ============================================================================
// DeliberationManager
// ============================================================================

/// Rate-limited deliberation restarts
pub struct DeliberationManager {
    max_restarts_per_hour: usize,
    cooldown: Duration,
    history: Mutex<HashMap<String, Vec<DateTime<Utc>>>>,
    event_store: Option<Arc<EventStore>>,
}

impl DeliberationManager {
    pub fn new(max_restarts_per_hour: usize, cooldown: Duration, event_store: Option<Arc<EventStore>>) -> Self {
        Self {
            max_restarts_per_hour,
            cooldown,
            history: Mutex::new(HashMap::new()),
            event_store,
        }
    }

    pub fn can_restart(&self, workflow_id: &str) -> bool {
        self.can_restart_at(workflow_id, Utc::now())
    }

    fn can_restart_at(&self, workflow_id: &str, now: DateTime<Utc>) -> bool {
        let mut history = self.history.lock();
        let Some(restarts) = history.get_mut(workflow_id) else {
            return true;
        };
        restarts.retain(|at| now - *at < ChronoDuration::hours(1));

        if restarts.len() >= self.max_restarts_per_hour {
            return false;
        }
        let cooldown = ChronoDuration::from_std(self.cooldown).unwrap_or(ChronoDuration::zero());
        match restarts.iter().max() {
            Some(last) => now - *last >= cooldown,
            None => true,
        }
    }

    /// Restarts the workflow's deliberation unless rate limited.
    pub async fn trigger_restart(&self, workflow_id: &str, reason: &str, affected_agents: &[String]) -> bool {
        if !self.can_restart(workflow_id) {
            warn!(workflow_id = %workflow_id, "Cannot restart workflow: rate limit exceeded");
            return false;
        }
        self.history
            .lock()
            .entry(workflow_id.to_string())
            .or_default()
            .push(Utc::now());

        if let Some(store) = &self.event_store {
            store.trigger_deliberation_restart(workflow_id, reason).await;
        }
        telemetry::record_restart();
        info!(
            workflow_id = %workflow_id,
            reason = %reason,
            affected = ?affected_agents,
            "Triggered deliberation restart"
        );
        true
    }

    /// Reason to restart the workflow, if any.
    pub fn evaluate_restart_condition(&self, health: &WorkflowHealth, threshold: f64) -> Option<String> {
        if let Some(dominant) = &health.dominant_agent {
            if let Some(share) = health.balance_share(dominant) {
                if share > DOMINANCE_SHARE {
                    return Some(format!("Agent {dominant} is dominating ({:.1}%)", share * 100.0));
                }
            }
        }

        if health.lazy_agents.len() as f64 > health.agents.len() as f64 * threshold {
            return Some(format!(
                "Too many lazy agents: {}/{}",
                health.lazy_agents.len(),
                health.agents.len()
            ));
        }

        if health.health_score < LOW_HEALTH_SCORE {
            return Some(format!("Low workflow health score: {:.2}", health.health_score));
        }

        None
    }
}

// ============================================================================
// Reports
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentHealthReport {
    pub agent_id: String,
    pub health_status: AgentHealthStatus,
    pub contribution_count: u64,
    pub success_rate: f64,
    pub avg_influence: f64,
    pub avg_response_time_ms: f64,
    pub lazy_detections: u64,
    pub consecutive_failures: u64,
    pub last_contribution: Option<DateTime<Utc>>,
}

impl From<&AgentPerformanceMetrics> for AgentHealthReport {
    fn from(metrics: &AgentPerformanceMetrics) -> Self {
        Self {
            agent_id: metrics.agent_id.clone(),
            health_status: metrics.health_status,
            contribution_count: metrics.contribution_count,
            success_rate: metrics.success_rate(),
            avg_influence: metrics.avg_influence(),
            avg_response_time_ms: metrics.avg_response_time_ms,
            lazy_detections: metrics.lazy_detections,
            consecutive_failures: metrics.consecutive_failures,
            last_contribution: metrics.last_contribution,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverallHealthStats {
    pub total_agents: usize,
    pub healthy_agents: usize,
    pub lazy_agents: usize,
    pub dominant_agents: usize,
    pub active_workflows: usize,
    pub total_restarts: u32,
    pub system_health_score: f64,
}

// ============================================================================
// HealthManager
// ============================================================================

#[derive(Default)]
struct HealthState {
    previous_statuses: HashMap<ServiceId, ServiceStatus>,
    agents: HashMap<String, AgentPerformanceMetrics>,
    workflows: HashMap<String, WorkflowHealth>,
}

pub struct HealthManager {
    interval: Duration,
    auto_recovery_enabled: bool,
    lazy_detection_enabled: bool,
    registry: Arc<dyn ServiceRegistry>,
    event_store: Arc<EventStore>,
    probe: Arc<dyn HealthProbe>,
    state: Mutex<HealthState>,
    detector: Mutex<LazyAgentDetector>,
    deliberation: DeliberationManager,
}

impl HealthManager {
    pub fn new(
        registry_config: &RegistryConfig,
        config: &HealthManagementConfig,
        registry: Arc<dyn ServiceRegistry>,
        event_store: Arc<EventStore>,
        probe: Arc<dyn HealthProbe>,
    ) -> Self {
        Self {
            interval: registry_config.health_check_interval,
            auto_recovery_enabled: config.auto_recovery_enabled,
            lazy_detection_enabled: config.lazy_detection_enabled,
            registry,
            deliberation: DeliberationManager::new(
                config.max_restarts_per_hour,
                config.restart_cooldown,
                Some(event_store.clone()),
            ),
            event_store,
            probe,
            state: Mutex::new(HealthState::default()),
            detector: Mutex::new(LazyAgentDetector::new(config.lazy_threshold, config.window_size)),
        }
    }

    pub fn deliberation_manager(&self) -> &DeliberationManager {
        &self.deliberation
    }

    /// Runs health cycles until `cancel` fires.
    pub async fn run_health_checks(&self, cancel: CancellationToken) {
        info!(interval = ?self.interval, "Health checks started");
        let mut ticker = tokio::time::interval(self.interval.max(Duration::from_millis(10)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.run_cycle().await;
        }
        info!("Health checks stopped");
    }

    /// One full health cycle.
    pub async fn run_cycle(&self) {
        self.check_all_services().await;
        if self.lazy_detection_enabled {
            self.analyze_agent_health().await;
        }
        self.check_workflow_health().await;
    }

    async fn check_all_services(&self) {
        let services = match self.registry.list_services().await {
            Ok(services) => services,
            Err(e) => {
                error!(error = %e, "Health check error: failed to list services");
                return;
            }
        };
        for instance in services.values().flatten() {
            self.check_service_health(instance).await;
        }
    }

    /// Probes one instance, updates its registry status, and emits
    /// `health_changed` when the status differs from the last observation.
    pub async fn check_service_health(&self, instance: &ServiceInstance) {
        let old_status = self
            .state
            .lock()
            .previous_statuses
            .get(&instance.service_id)
            .copied()
            .unwrap_or(instance.status);

        let outcome = self.probe.probe(instance).await;
        telemetry::record_health_check(outcome.is_healthy());

        let new_status = if outcome.is_healthy() {
            ServiceStatus::Healthy
        } else {
            ServiceStatus::Unhealthy
        };

        match &outcome {
            ProbeOutcome::Responded { healthy: true, .. } => {
                if outcome.reported_kind().is_some_and(|k| AGENT_KINDS.contains(&k)) {
                    self.update_agent_metrics(&instance.name, outcome.response_time_ms(), true);
                }
            }
            ProbeOutcome::Responded { .. } => {
                self.update_agent_metrics(&instance.name, outcome.response_time_ms(), false);
            }
            ProbeOutcome::Unreachable { error, .. } => {
                debug!(service = %instance.name, error = %error, "Health check failed");
                self.update_agent_metrics(&instance.name, 0.0, false);
            }
        }

        if let Err(e) = self
            .registry
            .update_service_health(&instance.name, instance.service_id, new_status)
            .await
        {
            error!(service = %instance.name, error = %e, "Failed to update service health");
        }

        if old_status != new_status {
            info!(
                service = %instance.name,
                old_status = %old_status,
                new_status = %new_status,
                "Service health changed"
            );
            let event = Event::new(EventType::HealthChanged)
                .with_service(instance.name.as_str())
                .with_service_id(instance.service_id.to_string())
                .with_status_change(old_status.as_str(), new_status.as_str())
                .with_metadata(json!({ "response_time_ms": outcome.response_time_ms() }));
            self.event_store.add_event(event).await;
        }

        self.state
            .lock()
            .previous_statuses
            .insert(instance.service_id, new_status);
    }

    fn update_agent_metrics(&self, agent_id: &str, response_time_ms: f64, success: bool) {
        let report = self.event_store.get_agent_report(agent_id);
        let mut state = self.state.lock();
        let metrics = state
            .agents
            .entry(agent_id.to_string())
            .or_insert_with(|| AgentPerformanceMetrics::new(agent_id));
        metrics.record_outcome(success, response_time_ms);
        metrics.total_influence_score = report.total_influence;
        metrics.lazy_detections = report.lazy_flags;
    }

    async fn analyze_agent_health(&self) {
        let mut newly_lazy = Vec::new();
        {
            let mut state = self.state.lock();
            let mut detector = self.detector.lock();
            for (agent_id, metrics) in state.agents.iter_mut() {
                detector.record_contribution(agent_id, metrics.avg_influence());
                let status = detector.analyze_agent(agent_id);
                let previous = metrics.health_status;
                metrics.health_status = status;

                if previous != status && status == AgentHealthStatus::Lazy {
                    metrics.lazy_detections += 1;
                    newly_lazy.push(
                        Event::new(EventType::AgentLazyDetected)
                            .with_service(agent_id.as_str())
                            .with_metadata(json!({
                                "lazy_count": metrics.lazy_detections,
                                "avg_influence": metrics.avg_influence(),
                                "success_rate": metrics.success_rate(),
                            })),
                    );
                }
            }
        }

        for event in newly_lazy {
            warn!(agent = ?event.service_name, "Lazy agent detected");
            self.event_store.add_event(event).await;
        }
    }

    async fn check_workflow_health(&self) {
        let workflow_ids: Vec<String> = self.state.lock().workflows.keys().cloned().collect();

        for workflow_id in workflow_ids {
            let report = self.event_store.get_workflow_report(&workflow_id);
            if report
                .as_ref()
                .and_then(|r| r.state)
                .is_some_and(|state| matches!(state, WorkflowState::Completed | WorkflowState::Failed))
            {
                continue;
            }

            let snapshot = {
                let mut state = self.state.lock();
                let HealthState { agents, workflows, .. } = &mut *state;
                let Some(health) = workflows.get_mut(&workflow_id) else {
                    continue;
                };

                if let Some(report) = &report {
                    for (agent_id, stats) in &report.agent_stats {
                        health.contribution_balance.insert(agent_id.clone(), stats.influence);
                    }
                }

                let detector = self.detector.lock();
                health.lazy_agents = detector.lazy_agents(&health.agents);
                health.dominant_agent = detector.dominant_agent(&health.agents);

                if !health.agents.is_empty() {
                    let operational = health
                        .agents
                        .iter()
                        .filter(|a| {
                            agents
                                .get(a.as_str())
                                .map_or(AgentHealthStatus::Starting, |m| m.health_status)
                                .is_operational()
                        })
                        .count();
                    health.health_score = operational as f64 / health.agents.len() as f64;
                }
                health.clone()
            };

            if !self.auto_recovery_enabled {
                continue;
            }
            let Some(reason) = self
                .deliberation
                .evaluate_restart_condition(&snapshot, LAZY_SHARE_THRESHOLD)
            else {
                continue;
            };

            let affected = if !snapshot.lazy_agents.is_empty() {
                snapshot.lazy_agents.clone()
            } else {
                snapshot.dominant_agent.iter().cloned().collect()
            };
            if self
                .deliberation
                .trigger_restart(&workflow_id, &reason, &affected)
                .await
            {
                if let Some(health) = self.state.lock().workflows.get_mut(&workflow_id) {
                    health.restart_count += 1;
                }
            }
        }
    }

    // ========================================================================
    // Workflow tracking
    // ========================================================================

    pub fn register_workflow(&self, workflow_id: &str, agents: Vec<String>) {
        self.state
            .lock()
            .workflows
            .insert(workflow_id.to_string(), WorkflowHealth::new(workflow_id, agents));
    }

    pub fn unregister_workflow(&self, workflow_id: &str) -> bool {
        self.state.lock().workflows.remove(workflow_id).is_some()
    }

    pub async fn record_agent_contribution(
        &self,
        agent_id: &str,
        workflow_id: &str,
        influence_score: f64,
        success: bool,
    ) {
        let (turn_number, latency_ms) = {
            let mut state = self.state.lock();
            let metrics = state
                .agents
                .entry(agent_id.to_string())
                .or_insert_with(|| AgentPerformanceMetrics::new(agent_id));
            metrics.contribution_count += 1;
            metrics.total_influence_score += influence_score;
            metrics.last_contribution = Some(Utc::now());
            if success {
                metrics.successful_contributions += 1;
            }
            let turn = (metrics.contribution_count.min(u32::MAX as u64)) as u32;
            let latency = metrics.avg_response_time_ms;

            if let Some(health) = state.workflows.get_mut(workflow_id) {
                *health
                    .contribution_balance
                    .entry(agent_id.to_string())
                    .or_insert(0.0) += influence_score;
            }
            (turn, latency)
        };
        self.detector.lock().record_contribution(agent_id, influence_score);

        self.event_store
            .record_contribution(
                agent_id,
                workflow_id,
                turn_number,
                ActionType::from("contribution"),
                latency_ms,
                success,
                None,
            )
            .await;
    }

    // ========================================================================
    // Reports
    // ========================================================================

    pub fn agent_health_report(&self, agent_id: &str) -> AgentHealthReport {
        match self.state.lock().agents.get(agent_id) {
            Some(metrics) => AgentHealthReport::from(metrics),
            None => AgentHealthReport::from(&AgentPerformanceMetrics::new(agent_id)),
        }
    }

    pub fn agent_health_reports(&self) -> Vec<AgentHealthReport> {
        let mut reports: Vec<AgentHealthReport> =
            self.state.lock().agents.values().map(AgentHealthReport::from).collect();
        reports.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        reports
    }

    pub fn workflow_health_report(&self, workflow_id: &str) -> Option<WorkflowHealth> {
        self.state.lock().workflows.get(workflow_id).cloned()
    }

    pub fn overall_health_stats(&self) -> OverallHealthStats {
        let state = self.state.lock();
        let count = |status: AgentHealthStatus| {
            state
                .agents
                .values()
                .filter(|m| m.health_status == status)
                .count()
        };
        let total_agents = state.agents.len();
        let healthy_agents = count(AgentHealthStatus::Healthy);

        OverallHealthStats {
            total_agents,
            healthy_agents,
            lazy_agents: count(AgentHealthStatus::Lazy),
            dominant_agents: count(AgentHealthStatus::Dominant),
            active_workflows: state.workflows.len(),
            total_restarts: state.workflows.values().map(|w| w.restart_count).sum(),
            system_health_score: healthy_agents as f64 / total_agents.max(1) as f64,
        }
    }
}
