// Copyright (c) 2026 AOL Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Credit Assignment
//!
//! Shapley-value credit assignment for agents in multi-agent workflows, plus
//! the lazy-agent heuristic built on top of recorded contributions.
//!
//! The Shapley value of agent *i* over the agent set *N* with value function
//! *v* is
//!
//! ```text
//! φᵢ = Σ_{S ⊆ N∖{i}} |S|!·(n−|S|−1)! / n! · (v(S ∪ {i}) − v(S))
//! ```
//!
//! Computation is exact and enumerates every coalition, so player sets are
//! capped at [`MAX_SHAPLEY_PLAYERS`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

/// Largest player set exact enumeration accepts (2^(n-1) coalitions per agent).
pub const MAX_SHAPLEY_PLAYERS: usize = 20;

#[derive(Debug, Error, PartialEq)]
pub enum CreditError {
    #[error("Too many players for exact Shapley values: {0} (max {MAX_SHAPLEY_PLAYERS})")]
    TooManyPlayers(usize),
}

/// A coalition of agents, ordered so value functions see a stable iteration.
pub type Coalition = BTreeSet<String>;

/// Characteristic function of the cooperative game.
pub type ValueFn = dyn Fn(&Coalition) -> f64 + Send + Sync;

/// Kind of action an agent performed in a turn
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActionType {
    Reasoning,
    Decision,
    Verification,
    Delegation,
    Other(String),
}

impl ActionType {
    /// Default influence multiplier used when no value function is supplied.
    pub fn weight(&self) -> f64 {
        match self {
            ActionType::Reasoning => 1.2,
            ActionType::Decision => 1.5,
            ActionType::Verification => 1.0,
            ActionType::Delegation => 0.8,
            ActionType::Other(_) => 1.0,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ActionType::Reasoning => "reasoning",
            ActionType::Decision => "decision",
            ActionType::Verification => "verification",
            ActionType::Delegation => "delegation",
            ActionType::Other(other) => other,
        }
    }
}

impl From<String> for ActionType {
    fn from(value: String) -> Self {
        ActionType::from(value.as_str())
    }
}

impl From<&str> for ActionType {
    fn from(value: &str) -> Self {
        match value {
            "reasoning" => ActionType::Reasoning,
            "decision" => ActionType::Decision,
            "verification" => ActionType::Verification,
            "delegation" => ActionType::Delegation,
            other => ActionType::Other(other.to_string()),
        }
    }
}

impl From<ActionType> for String {
    fn from(value: ActionType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One turn of one agent inside a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentContribution {
    pub agent_id: String,
    pub workflow_id: String,
    pub turn_number: u32,
    pub action_type: ActionType,
    pub latency_ms: f64,
    pub success: bool,
    pub influence_score: f64,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// ShapleyCalculator
// ============================================================================

pub struct ShapleyCalculator;

impl ShapleyCalculator {
    /// Marginal (Shapley) contribution of `agent` to the game over `all_agents`.
    ///
    /// The agent is added to the player set when missing and duplicates are
    /// collapsed. An empty player set yields `0.0`.
    pub fn marginal_contribution(
        agent: &str,
        all_agents: &[String],
        value_fn: &ValueFn,
    ) -> Result<f64, CreditError> {
        let mut players: Coalition = all_agents.iter().cloned().collect();
        if players.is_empty() {
            return Ok(0.0);
        }
        players.insert(agent.to_string());
        if players.len() > MAX_SHAPLEY_PLAYERS {
            return Err(CreditError::TooManyPlayers(players.len()));
        }

        let others: Vec<&String> = players.iter().filter(|p| p.as_str() != agent).collect();
        let n = players.len();
        let n_factorial = factorial(n);

        let mut value = 0.0;
        for mask in 0u64..(1u64 << others.len()) {
            let coalition: Coalition = others
                .iter()
                .enumerate()
                .filter(|(bit, _)| mask & (1u64 << bit) != 0)
                .map(|(_, name)| (*name).clone())
                .collect();
            let size = coalition.len();
            let weight = factorial(size) * factorial(n - size - 1) / n_factorial;

            let without = value_fn(&coalition);
            let mut with = coalition;
            with.insert(agent.to_string());
            value += weight * (value_fn(&with) - without);
        }
        Ok(value)
    }

    /// Shapley value of every distinct agent.
    pub fn shapley_values(
        all_agents: &[String],
        value_fn: &ValueFn,
    ) -> Result<BTreeMap<String, f64>, CreditError> {
        let players: Coalition = all_agents.iter().cloned().collect();
        players
            .iter()
            .map(|agent| {
                Self::marginal_contribution(agent, all_agents, value_fn).map(|phi| (agent.clone(), phi))
            })
            .collect()
    }

    /// Agents whose share of the total influence is below `threshold`.
    ///
    /// When the total influence is zero, every contributing agent is lazy.
    pub fn detect_lazy_agents(contributions: &[AgentContribution], threshold: f64) -> Vec<String> {
        let influence = influence_by_agent(contributions);
        let total: f64 = influence.values().sum();

        if total == 0.0 {
            return influence.into_keys().collect();
        }

        influence
            .into_iter()
            .filter(|(_, score)| score / total < threshold)
            .map(|(agent, _)| agent)
            .collect()
    }
}

/// Total influence per agent, ordered by agent id.
pub fn influence_by_agent(contributions: &[AgentContribution]) -> BTreeMap<String, f64> {
    let mut influence = BTreeMap::new();
    for contribution in contributions {
        *influence.entry(contribution.agent_id.clone()).or_insert(0.0) += contribution.influence_score;
    }
    influence
}

fn factorial(n: usize) -> f64 {
    (1..=n).fold(1.0, |acc, k| acc * k as f64)
}
