// Copyright (c) 2026 AOL Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Agent and workflow health value objects.

use crate::domain::service::ServiceInstance;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentHealthStatus {
    Healthy,
    Unhealthy,
    Degraded,
    Lazy,
    Dominant,
    Recovering,
    Starting,
}

impl AgentHealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentHealthStatus::Healthy => "healthy",
            AgentHealthStatus::Unhealthy => "unhealthy",
            AgentHealthStatus::Degraded => "degraded",
            AgentHealthStatus::Lazy => "lazy",
            AgentHealthStatus::Dominant => "dominant",
            AgentHealthStatus::Recovering => "recovering",
            AgentHealthStatus::Starting => "starting",
        }
    }

    /// Statuses that count towards a workflow's health score.
    pub fn is_operational(&self) -> bool {
        matches!(self, AgentHealthStatus::Healthy | AgentHealthStatus::Starting)
    }
}

impl fmt::Display for AgentHealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rolling performance picture of one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentPerformanceMetrics {
    pub agent_id: String,
    pub contribution_count: u64,
    pub successful_contributions: u64,
    pub total_influence_score: f64,
    pub avg_response_time_ms: f64,
    /// Outcomes that carried a response time
    #[serde(default)]
    pub response_samples: u64,
    pub lazy_detections: u64,
    pub recovery_attempts: u64,
    pub last_contribution: Option<DateTime<Utc>>,
    pub consecutive_failures: u64,
    pub health_status: AgentHealthStatus,
}

impl AgentPerformanceMetrics {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            contribution_count: 0,
            successful_contributions: 0,
            total_influence_score: 0.0,
            avg_response_time_ms: 0.0,
            response_samples: 0,
            lazy_detections: 0,
            recovery_attempts: 0,
            last_contribution: None,
            consecutive_failures: 0,
            health_status: AgentHealthStatus::Starting,
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.contribution_count == 0 {
            return 0.0;
        }
        self.successful_contributions as f64 / self.contribution_count as f64
    }

    pub fn avg_influence(&self) -> f64 {
        if self.contribution_count == 0 {
            return 0.0;
        }
        self.total_influence_score / self.contribution_count as f64
    }

    /// Records one probe or contribution outcome. Response time is an
    /// exponential moving average (0.9 old, 0.1 new) seeded by the first sample.
    pub fn record_outcome(&mut self, success: bool, response_time_ms: f64) {
        self.contribution_count += 1;
        if success {
            self.successful_contributions += 1;
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures += 1;
        }
        self.avg_response_time_ms = if self.response_samples == 0 {
            response_time_ms
        } else {
            self.avg_response_time_ms * 0.9 + response_time_ms * 0.1
        };
        self.response_samples += 1;
        self.last_contribution = Some(Utc::now());
    }
}

/// Health picture of one multi-agent workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowHealth {
    pub workflow_id: String,
    pub agents: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub contribution_balance: BTreeMap<String, f64>,
    pub restart_count: u32,
    pub lazy_agents: Vec<String>,
    pub dominant_agent: Option<String>,
    pub health_score: f64,
}

impl WorkflowHealth {
    pub fn new(workflow_id: impl Into<String>, agents: Vec<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            agents,
            started_at: Utc::now(),
            contribution_balance: BTreeMap::new(),
            restart_count: 0,
            lazy_agents: Vec::new(),
            dominant_agent: None,
            health_score: 1.0,
        }
    }

    /// Share of the total balance held by `agent`, `None` when nothing was credited.
    pub fn balance_share(&self, agent: &str) -> Option<f64> {
        let total: f64 = self.contribution_balance.values().sum();
        if total <= 0.0 {
            return None;
        }
        Some(self.contribution_balance.get(agent).copied().unwrap_or(0.0) / total)
    }
}

/// Result of probing one service instance's health endpoint
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    /// The endpoint answered; `healthy` is true for HTTP 200.
    Responded {
        healthy: bool,
        status_code: u16,
        body: Option<Value>,
        response_time_ms: f64,
    },
    /// The endpoint could not be reached.
    Unreachable { error: String, response_time_ms: f64 },
}

impl ProbeOutcome {
    pub fn is_healthy(&self) -> bool {
        matches!(self, ProbeOutcome::Responded { healthy: true, .. })
    }

    pub fn response_time_ms(&self) -> f64 {
        match self {
            ProbeOutcome::Responded { response_time_ms, .. } => *response_time_ms,
            ProbeOutcome::Unreachable { response_time_ms, .. } => *response_time_ms,
        }
    }

    /// `kind` reported in the response body, if any.
    pub fn reported_kind(&self) -> Option<&str> {
        match self {
            ProbeOutcome::Responded { body: Some(body), .. } => body.get("kind").and_then(Value::as_str),
            _ => None,
        }
    }
}

#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, instance: &ServiceInstance) -> ProbeOutcome;
}
