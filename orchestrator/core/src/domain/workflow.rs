// Copyright (c) 2026 AOL Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Workflow Domain Model
//!
//! Multi-agent workflows are directed acyclic graphs of nodes (agents, tools,
//! routers, aggregators, checkpoints) connected by typed edges. Every graph
//! carries two implicit nodes, [`START_NODE`] and [`END_NODE`]; the entry point
//! is an edge out of `__start__`.
//!
//! # Architectural Context
//!
//! - **Bounded Context:** Workflow Context
//! - **Aggregate Root:** WorkflowGraph
//!
//! # Edge Semantics
//!
//! Outgoing edges are considered in descending priority order:
//!
//! 1. **Sequential:** taken, and no further edge is considered
//! 2. **Conditional:** the first edge whose condition matches is taken
//! 3. **Parallel:** every parallel edge is taken
//! 4. **Fallback:** never taken during normal traversal, only after a failure
//!
//! Runtime statistics live in interior-mutable tables so a graph shared
//! between concurrent executions can still be observed.

use crate::domain::routing::Condition;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use uuid::Uuid;

pub const START_NODE: &str = "__start__";
pub const END_NODE: &str = "__end__";

// ============================================================================
// Value Objects
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Agent,
    Tool,
    Router,
    Aggregator,
    Checkpoint,
    Human,
    Start,
    End,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Agent => "agent",
            NodeType::Tool => "tool",
            NodeType::Router => "router",
            NodeType::Aggregator => "aggregator",
            NodeType::Checkpoint => "checkpoint",
            NodeType::Human => "human",
            NodeType::Start => "start",
            NodeType::End => "end",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeType {
    #[default]
    Sequential,
    Conditional,
    Parallel,
    Fallback,
}

/// How an aggregator node combines the outputs of its predecessors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationMethod {
    #[default]
    Merge,
    List,
    First,
}

impl AggregationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationMethod::Merge => "merge",
            AggregationMethod::List => "list",
            AggregationMethod::First => "first",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub node_id: String,
    /// Display name; defaults to `node_id`
    #[serde(default)]
    pub name: String,
    pub node_type: NodeType,
    #[serde(default)]
    pub service_name: Option<String>,
    #[serde(default)]
    pub config: Value,
    #[serde(default = "default_node_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default = "default_node_retries")]
    pub retry_count: u32,
}

fn default_node_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_node_retries() -> u32 {
    3
}

impl WorkflowNode {
    pub fn new(node_id: impl Into<String>, node_type: NodeType) -> Self {
        let node_id = node_id.into();
        Self {
            name: node_id.clone(),
            node_id,
            node_type,
            service_name: None,
            config: Value::Object(Default::default()),
            timeout: default_node_timeout(),
            retry_count: default_node_retries(),
        }
    }

    pub fn agent(node_id: impl Into<String>, service_name: impl Into<String>) -> Self {
        Self::new(node_id, NodeType::Agent).with_service(service_name)
    }

    pub fn with_service(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = Some(service_name.into());
        self
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    pub fn aggregation(&self) -> AggregationMethod {
        self.config
            .get("aggregation")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeStats {
    pub execution_count: u64,
    pub success_count: u64,
    pub total_latency_ms: f64,
}

impl NodeStats {
    pub fn avg_latency_ms(&self) -> f64 {
        if self.execution_count == 0 {
            return 0.0;
        }
        self.total_latency_ms / self.execution_count as f64
    }

    pub fn success_rate(&self) -> f64 {
        if self.execution_count == 0 {
            return 0.0;
        }
        self.success_count as f64 / self.execution_count as f64
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowEdge {
    pub edge_id: String,
    pub source: String,
    pub target: String,
    pub edge_type: EdgeType,
    pub condition: Option<Condition>,
    pub priority: i32,
}

impl WorkflowEdge {
    pub fn id_for(source: &str, target: &str) -> String {
        format!("{source}_to_{target}")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Invalid workflow: {}", .0.join("; "))]
    Invalid(Vec<String>),

    #[error("Node {0} not found")]
    NodeNotFound(String),

    #[error("Failed to parse workflow definition: {0}")]
    Parse(String),
}

// ============================================================================
// Aggregate Root: WorkflowGraph
// ============================================================================

#[derive(Debug)]
pub struct WorkflowGraph {
    pub workflow_id: String,
    pub name: String,
    pub description: String,
    nodes: Vec<WorkflowNode>,
    edges: Vec<WorkflowEdge>,
    node_stats: Mutex<HashMap<String, NodeStats>>,
    traversals: Mutex<HashMap<String, u64>>,
}

impl WorkflowGraph {
    pub fn new(workflow_id: impl Into<String>, name: impl Into<String>, description: impl Into<String>) -> Self {
        let mut graph = Self {
            workflow_id: workflow_id.into(),
            name: name.into(),
            description: description.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
            node_stats: Mutex::new(HashMap::new()),
            traversals: Mutex::new(HashMap::new()),
        };
        let mut start = WorkflowNode::new(START_NODE, NodeType::Start);
        start.name = "Start".to_string();
        let mut end = WorkflowNode::new(END_NODE, NodeType::End);
        end.name = "End".to_string();
        graph.add_node(start);
        graph.add_node(end);
        graph
    }

    /// Adds a node, replacing any node with the same id.
    pub fn add_node(&mut self, node: WorkflowNode) {
        match self.nodes.iter_mut().find(|n| n.node_id == node.node_id) {
            Some(existing) => *existing = node,
            None => self.nodes.push(node),
        }
    }

    /// Adds an edge and returns its id. Re-adding an edge between the same
    /// pair of nodes replaces the previous one.
    pub fn add_edge(
        &mut self,
        source: &str,
        target: &str,
        edge_type: EdgeType,
        condition: Option<Condition>,
        priority: i32,
    ) -> String {
        let edge_id = WorkflowEdge::id_for(source, target);
        let edge = WorkflowEdge {
            edge_id: edge_id.clone(),
            source: source.to_string(),
            target: target.to_string(),
            edge_type,
            condition,
            priority,
        };
        match self.edges.iter_mut().find(|e| e.edge_id == edge_id) {
            Some(existing) => *existing = edge,
            None => self.edges.push(edge),
        }
        edge_id
    }

    pub fn connect(&mut self, source: &str, target: &str) -> String {
        self.add_edge(source, target, EdgeType::Sequential, None, 0)
    }

    pub fn set_entry_point(&mut self, node_id: &str) -> String {
        self.connect(START_NODE, node_id)
    }

    pub fn set_exit_point(&mut self, node_id: &str) -> String {
        self.connect(node_id, END_NODE)
    }

    pub fn node(&self, node_id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.node_id == node_id)
    }

    pub fn nodes(&self) -> &[WorkflowNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[WorkflowEdge] {
        &self.edges
    }

    pub fn outgoing(&self, node_id: &str) -> impl Iterator<Item = &WorkflowEdge> {
        let node_id = node_id.to_string();
        self.edges.iter().filter(move |e| e.source == node_id)
    }

    /// Service names referenced by the nodes, in node order, without duplicates.
    pub fn agents(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.nodes
            .iter()
            .filter_map(|n| n.service_name.clone())
            .filter(|s| seen.insert(s.clone()))
            .collect()
    }

    /// Next nodes to run after `current`, given the routing context.
    pub fn next_nodes(&self, current: &str, context: &Value) -> Vec<String> {
        let mut candidates: Vec<&WorkflowEdge> = self.outgoing(current).collect();
        candidates.sort_by(|a, b| b.priority.cmp(&a.priority));

        let mut next = Vec::new();
        for edge in candidates {
            match edge.edge_type {
                EdgeType::Sequential => {
                    self.record_traversal(&edge.edge_id);
                    next.push(edge.target.clone());
                    break;
                }
                EdgeType::Conditional => {
                    let matched = edge.condition.as_ref().is_some_and(|c| c.evaluate(context));
                    if matched {
                        self.record_traversal(&edge.edge_id);
                        next.push(edge.target.clone());
                        break;
                    }
                }
                EdgeType::Parallel => {
                    self.record_traversal(&edge.edge_id);
                    next.push(edge.target.clone());
                }
                EdgeType::Fallback => {}
            }
        }
        next
    }

    pub fn parallel_targets(&self, node_id: &str) -> Vec<String> {
        self.outgoing(node_id)
            .filter(|e| e.edge_type == EdgeType::Parallel)
            .map(|e| e.target.clone())
            .collect()
    }

    pub fn fallback_target(&self, node_id: &str) -> Option<String> {
        self.outgoing(node_id)
            .find(|e| e.edge_type == EdgeType::Fallback)
            .map(|e| e.target.clone())
    }

    /// Sources of every edge pointing at `node_id`, in edge order.
    pub fn predecessors(&self, node_id: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        self.edges
            .iter()
            .filter(|e| e.target == node_id)
            .map(|e| e.source.clone())
            .filter(|s| seen.insert(s.clone()))
            .collect()
    }

    /// Returns the list of problems with the graph, empty when it is runnable.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.outgoing(START_NODE).next().is_none() {
            errors.push("Workflow has no entry point".to_string());
        }

        for node in &self.nodes {
            if node.node_id == END_NODE {
                continue;
            }
            if self.outgoing(&node.node_id).next().is_none() {
                errors.push(format!("Node {} has no outgoing edges", node.node_id));
            }
        }

        if self.has_cycle() {
            errors.push("Workflow contains cycles (not a valid DAG)".to_string());
        }

        for edge in &self.edges {
            if self.node(&edge.target).is_none() {
                errors.push(format!("Edge {} targets non-existent node", edge.edge_id));
            }
            if self.node(&edge.source).is_none() {
                errors.push(format!("Edge {} originates from non-existent node", edge.edge_id));
            }
        }

        errors
    }

    fn has_cycle(&self) -> bool {
        fn visit<'a>(
            graph: &'a WorkflowGraph,
            node: &'a str,
            visited: &mut HashSet<&'a str>,
            stack: &mut HashSet<&'a str>,
        ) -> bool {
            visited.insert(node);
            stack.insert(node);
            for edge in graph.edges.iter().filter(|e| e.source == node) {
                let target = edge.target.as_str();
                if !visited.contains(target) {
                    if visit(graph, target, visited, stack) {
                        return true;
                    }
                } else if stack.contains(target) {
                    return true;
                }
            }
            stack.remove(node);
            false
        }

        let mut visited = HashSet::new();
        let mut stack = HashSet::new();
        for node in &self.nodes {
            if !visited.contains(node.node_id.as_str())
                && visit(self, &node.node_id, &mut visited, &mut stack)
            {
                return true;
            }
        }
        false
    }

    fn record_traversal(&self, edge_id: &str) {
        *self.traversals.lock().entry(edge_id.to_string()).or_insert(0) += 1;
    }

    pub fn traversal_count(&self, edge_id: &str) -> u64 {
        self.traversals.lock().get(edge_id).copied().unwrap_or(0)
    }

    pub fn begin_node_execution(&self, node_id: &str) -> u64 {
        let mut stats = self.node_stats.lock();
        let entry = stats.entry(node_id.to_string()).or_default();
        entry.execution_count += 1;
        entry.execution_count
    }

    pub fn finish_node_execution(&self, node_id: &str, latency_ms: f64, success: bool) {
        let mut stats = self.node_stats.lock();
        let entry = stats.entry(node_id.to_string()).or_default();
        entry.total_latency_ms += latency_ms;
        if success {
            entry.success_count += 1;
        }
    }

    pub fn node_stats(&self, node_id: &str) -> NodeStats {
        self.node_stats.lock().get(node_id).cloned().unwrap_or_default()
    }

    /// Serializable summary of the graph including runtime statistics.
    pub fn to_json(&self) -> Value {
        let nodes: Vec<Value> = self
            .nodes
            .iter()
            .map(|n| {
                let stats = self.node_stats(&n.node_id);
                json!({
                    "node_id": n.node_id,
                    "name": n.name,
                    "type": n.node_type.as_str(),
                    "service_name": n.service_name,
                    "config": n.config,
                    "execution_count": stats.execution_count,
                    "success_rate": stats.success_rate(),
                    "avg_latency_ms": stats.avg_latency_ms(),
                })
            })
            .collect();
        let edges: Vec<Value> = self
            .edges
            .iter()
            .map(|e| {
                json!({
                    "edge_id": e.edge_id,
                    "source": e.source,
                    "target": e.target,
                    "type": e.edge_type,
                    "priority": e.priority,
                    "traversal_count": self.traversal_count(&e.edge_id),
                })
            })
            .collect();
        json!({
            "workflow_id": self.workflow_id,
            "name": self.name,
            "description": self.description,
            "nodes": nodes,
            "edges": edges,
        })
    }

    /// Derives a workflow from a service manifest: every owned collection
    /// becomes an agent node, every `accessRequests` entry (`service.collection`)
    /// an edge from the accessed collection to each owned collection.
    pub fn from_manifest(manifest: &Value) -> Self {
        let service_name = manifest
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .unwrap_or("unnamed-workflow");
        let description = manifest
            .pointer("/spec/description")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let mut graph = WorkflowGraph::new(Uuid::new_v4().to_string(), service_name, description);

        let collections: Vec<&Value> = manifest
            .pointer("/spec/dataRequirements/collections")
            .and_then(Value::as_array)
            .map(|c| c.iter().collect())
            .unwrap_or_default();
        let collection_names: Vec<String> = collections
            .iter()
            .filter_map(|c| c.get("name").and_then(Value::as_str))
            .map(str::to_string)
            .collect();

        for collection in &collections {
            let Some(name) = collection.get("name").and_then(Value::as_str) else {
                continue;
            };
            let config = collection
                .get("schemaHint")
                .cloned()
                .unwrap_or_else(|| json!({}));
            graph.add_node(WorkflowNode::agent(name, service_name).with_config(config));
        }

        let access_requests = manifest
            .pointer("/spec/dataRequirements/accessRequests")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for access in access_requests {
            let reference = access.get("collection").and_then(Value::as_str).unwrap_or_default();
            let mut parts = reference.split('.');
            let (Some(_service), Some(source_collection)) = (parts.next(), parts.next()) else {
                continue;
            };
            for target in &collection_names {
                graph.connect(source_collection, target);
            }
        }

        graph
    }
}

// ============================================================================
// Wire Format: WorkflowDefinition
// ============================================================================

/// Declarative workflow document, as submitted over the API or read from YAML.
///
/// ```yaml
/// name: research
/// entry: planner
/// exit: [writer]
/// nodes:
///   - { node_id: planner, node_type: agent, service_name: planner-agent }
///   - { node_id: writer, node_type: agent, service_name: writer-agent }
/// edges:
///   - { source: planner, target: writer }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    #[serde(default)]
    pub workflow_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub nodes: Vec<WorkflowNode>,
    #[serde(default)]
    pub edges: Vec<EdgeDefinition>,
    #[serde(default)]
    pub entry: Option<String>,
    #[serde(default)]
    pub exit: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDefinition {
    pub source: String,
    pub target: String,
    #[serde(default, rename = "type")]
    pub edge_type: EdgeType,
    #[serde(default)]
    pub condition: Option<Condition>,
    #[serde(default)]
    pub priority: i32,
}

impl WorkflowDefinition {
    pub fn from_yaml(content: &str) -> Result<Self, WorkflowError> {
        serde_yaml::from_str(content).map_err(|e| WorkflowError::Parse(e.to_string()))
    }

    pub fn into_graph(self) -> WorkflowGraph {
        let workflow_id = self
            .workflow_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut graph = WorkflowGraph::new(workflow_id, self.name, self.description);
        for mut node in self.nodes {
            if node.name.is_empty() {
                node.name = node.node_id.clone();
            }
            graph.add_node(node);
        }
        if let Some(entry) = &self.entry {
            graph.set_entry_point(entry);
        }
        for edge in self.edges {
            graph.add_edge(&edge.source, &edge.target, edge.edge_type, edge.condition, edge.priority);
        }
        for exit in &self.exit {
            graph.set_exit_point(exit);
        }
        graph
    }
}

// ============================================================================
// WorkflowBuilder
// ============================================================================

/// Fluent construction of workflow graphs.
///
/// Agents added one after another are chained sequentially; routers and
/// parallel fan-outs break the chain.
pub struct WorkflowBuilder {
    graph: WorkflowGraph,
    last_node: Option<String>,
}

impl WorkflowBuilder {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            graph: WorkflowGraph::new(Uuid::new_v4().to_string(), name, description),
            last_node: None,
        }
    }

    pub fn add_agent(mut self, name: &str, service_name: &str, config: Option<Value>) -> Self {
        let node = WorkflowNode::agent(name, service_name).with_config(config.unwrap_or_else(|| json!({})));
        self.graph.add_node(node);
        match &self.last_node {
            Some(last) => {
                let last = last.clone();
                self.graph.connect(&last, name);
            }
            None => {
                self.graph.set_entry_point(name);
            }
        }
        self.last_node = Some(name.to_string());
        self
    }

    pub fn add_router(mut self, name: &str, routes: Vec<(String, Condition)>) -> Self {
        self.graph.add_node(WorkflowNode::new(name, NodeType::Router));
        if let Some(last) = self.last_node.take() {
            self.graph.connect(&last, name);
        }
        for (target, condition) in routes {
            self.graph
                .add_edge(name, &target, EdgeType::Conditional, Some(condition), 0);
        }
        self
    }

    pub fn add_parallel(mut self, targets: &[&str]) -> Self {
        let source = self
            .last_node
            .take()
            .unwrap_or_else(|| START_NODE.to_string());
        for target in targets {
            self.graph.add_edge(&source, target, EdgeType::Parallel, None, 0);
        }
        self
    }

    pub fn add_aggregator(mut self, name: &str, method: AggregationMethod) -> Self {
        let node = WorkflowNode::new(name, NodeType::Aggregator)
            .with_config(json!({ "aggregation": method.as_str() }));
        self.graph.add_node(node);
        self.last_node = Some(name.to_string());
        self
    }

    pub fn add_node(mut self, node: WorkflowNode) -> Self {
        self.graph.add_node(node);
        self
    }

    pub fn connect(mut self, source: &str, target: &str) -> Self {
        self.graph.connect(source, target);
        self
    }

    pub fn set_fallback(mut self, source: &str, fallback: &str) -> Self {
        self.graph.add_edge(source, fallback, EdgeType::Fallback, None, 0);
        self
    }

    pub fn build(mut self) -> WorkflowGraph {
        if let Some(last) = self.last_node.take() {
            self.graph.set_exit_point(&last);
        }
        self.graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_graph_has_implicit_nodes() {
        let graph = WorkflowGraph::new("wf", "test", "");
        assert!(graph.node(START_NODE).is_some());
        assert!(graph.node(END_NODE).is_some());
        assert_eq!(graph.validate(), vec!["Workflow has no entry point", "Node __start__ has no outgoing edges"]);
    }

    #[test]
    fn test_builder_chains_agents() {
        let graph = WorkflowBuilder::new("chain", "")
            .add_agent("plan", "planner", None)
            .add_agent("act", "executor", None)
            .build();
        assert!(graph.validate().is_empty());
        assert_eq!(graph.next_nodes(START_NODE, &json!({})), vec!["plan"]);
        assert_eq!(graph.next_nodes("plan", &json!({})), vec!["act"]);
        assert_eq!(graph.next_nodes("act", &json!({})), vec![END_NODE]);
        assert_eq!(graph.traversal_count("plan_to_act"), 1);
        assert_eq!(graph.agents(), vec!["planner", "executor"]);
    }

    #[test]
    fn test_sequential_edge_stops_iteration() {
        let mut graph = WorkflowGraph::new("wf", "t", "");
        graph.add_node(WorkflowNode::new("a", NodeType::Tool));
        graph.add_node(WorkflowNode::new("b", NodeType::Tool));
        graph.add_node(WorkflowNode::new("c", NodeType::Tool));
        graph.add_edge("a", "b", EdgeType::Parallel, None, 0);
        graph.add_edge("a", "c", EdgeType::Sequential, None, 5);
        assert_eq!(graph.next_nodes("a", &json!({})), vec!["c"]);
    }

    #[test]
    fn test_conditional_first_match_wins_by_priority() {
        let mut graph = WorkflowGraph::new("wf", "t", "");
        for id in ["r", "x", "y"] {
            graph.add_node(WorkflowNode::new(id, NodeType::Agent));
        }
        graph.add_edge("r", "x", EdgeType::Conditional, Some(Condition::Always), 1);
        graph.add_edge("r", "y", EdgeType::Conditional, Some(Condition::Always), 10);
        assert_eq!(graph.next_nodes("r", &json!({})), vec!["y"]);

        let mut graph = WorkflowGraph::new("wf", "t", "");
        graph.add_edge(
            "r",
            "x",
            EdgeType::Conditional,
            Some(Condition::equals("/current_output/route", "x")),
            0,
        );
        assert!(graph.next_nodes("r", &json!({"current_output": {"route": "z"}})).is_empty());
        assert_eq!(
            graph.next_nodes("r", &json!({"current_output": {"route": "x"}})),
            vec!["x"]
        );
    }

    #[test]
    fn test_fallback_edges_are_skipped() {
        let graph = WorkflowBuilder::new("fb", "")
            .add_agent("a", "svc-a", None)
            .add_node(WorkflowNode::agent("backup", "svc-b"))
            .connect("backup", END_NODE)
            .set_fallback("a", "backup")
            .build();
        assert_eq!(graph.next_nodes("a", &json!({})), vec![END_NODE]);
        assert_eq!(graph.fallback_target("a").as_deref(), Some("backup"));
    }

    #[test]
    fn test_parallel_builder_and_aggregator() {
        let graph = WorkflowBuilder::new("fan", "")
            .add_node(WorkflowNode::agent("left", "l"))
            .add_node(WorkflowNode::agent("right", "r"))
            .add_parallel(&["left", "right"])
            .add_aggregator("join", AggregationMethod::List)
            .connect("left", "join")
            .connect("right", "join")
            .build();
        assert!(graph.validate().is_empty(), "{:?}", graph.validate());
        assert_eq!(graph.parallel_targets(START_NODE), vec!["left", "right"]);
        assert_eq!(graph.predecessors("join"), vec!["left", "right"]);
        assert_eq!(graph.node("join").unwrap().aggregation(), AggregationMethod::List);
    }

    #[test]
    fn test_cycle_detection() {
        let mut graph = WorkflowBuilder::new("loop", "")
            .add_agent("a", "s", None)
            .add_agent("b", "s", None)
            .build();
        graph.connect("b", "a");
        assert!(graph
            .validate()
            .contains(&"Workflow contains cycles (not a valid DAG)".to_string()));
    }

    #[test]
    fn test_dangling_edges_reported() {
        let mut graph = WorkflowBuilder::new("d", "").add_agent("a", "s", None).build();
        graph.connect("a", "ghost");
        graph.connect("phantom", END_NODE);
        let errors = graph.validate();
        assert!(errors.contains(&"Edge a_to_ghost targets non-existent node".to_string()));
        assert!(errors.contains(&"Edge phantom_to___end__ originates from non-existent node".to_string()));
    }

    #[test]
    fn test_from_manifest_maps_collections() {
        let manifest = json!({
            "metadata": { "name": "analytics" },
            "spec": {
                "dataRequirements": {
                    "enabled": true,
                    "collections": [
                        { "name": "reports", "schemaHint": { "title": "string" } },
                        { "name": "summaries" }
                    ],
                    "accessRequests": [
                        { "collection": "crawler.pages" },
                        { "collection": "malformed" }
                    ]
                }
            }
        });
        let graph = WorkflowGraph::from_manifest(&manifest);
        assert_eq!(graph.name, "analytics");
        let reports = graph.node("reports").unwrap();
        assert_eq!(reports.node_type, NodeType::Agent);
        assert_eq!(reports.service_name.as_deref(), Some("analytics"));
        assert_eq!(reports.config["title"], "string");
        let edge_ids: Vec<_> = graph.edges().iter().map(|e| e.edge_id.clone()).collect();
        assert_eq!(edge_ids, vec!["pages_to_reports", "pages_to_summaries"]);
    }

    #[test]
    fn test_definition_yaml_into_graph() {
        let yaml = r#"
name: research
entry: planner
exit: [writer]
nodes:
  - { node_id: planner, name: planner, node_type: agent, service_name: planner-agent }
  - { node_id: writer, name: writer, node_type: agent, service_name: writer-agent, timeout: 5s }
edges:
  - { source: planner, target: writer }
"#;
        let graph = WorkflowDefinition::from_yaml(yaml).unwrap().into_graph();
        assert!(graph.validate().is_empty());
        assert_eq!(graph.node("writer").unwrap().timeout, Duration::from_secs(5));
        assert_eq!(graph.node("planner").unwrap().retry_count, 3);
    }

    #[test]
    fn test_node_stats_accumulate() {
        let graph = WorkflowGraph::new("wf", "t", "");
        assert_eq!(graph.begin_node_execution("a"), 1);
        graph.finish_node_execution("a", 10.0, true);
        graph.begin_node_execution("a");
        graph.finish_node_execution("a", 30.0, false);
        let stats = graph.node_stats("a");
        assert_eq!(stats.success_rate(), 0.5);
        assert_eq!(stats.avg_latency_ms(), 20.0);
    }
}
