// Copyright (c) 2026 AOL Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Workflow Executor Application Service
//!
//! Runs a [`WorkflowGraph`] from `__start__` to completion, invoking the
//! services behind agent and tool nodes and crediting their contributions.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Drive a workflow DAG to completion
//! - **Dependencies:** Domain (Workflow), Application (Router, EventStore)
//!
//! # Traversal
//!
//! ```text
//! execute_from(node):
//!     output = node is start/end ? stored output : execute_node(node)
//!     if node is end: return global state
//!     next = graph.next_nodes(node, {current_output, state, node_outputs})
//!     if next is empty: return output
//!     if node has > 1 parallel targets: run them concurrently, first success wins
//!     else: execute_from(next[0])
//! ```
//!
//! A failing node follows its fallback edge when it has one; otherwise the
//! error ends the execution.

use crate::application::event_store::EventStore;
use crate::application::router::Router;
use crate::domain::credit::ActionType;
use crate::domain::workflow::{AggregationMethod, NodeType, WorkflowGraph, WorkflowNode, START_NODE};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(300);
const EXECUTOR_SOURCE: &str = "workflow-executor";
const NODE_METHOD: &str = "Process";

// ============================================================================
// Service invocation
// ============================================================================

/// Calls a service on behalf of a workflow node
#[async_trait]
pub trait ServiceInvoker: Send + Sync {
    async fn invoke(&self, service_name: &str, method: &str, input: Value, timeout: Duration) -> Result<Value>;
}

/// Invokes services through the request router with JSON payloads
pub struct RouterInvoker {
    router: Arc<Router>,
}

impl RouterInvoker {
    pub fn new(router: Arc<Router>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl ServiceInvoker for RouterInvoker {
    async fn invoke(&self, service_name: &str, method: &str, input: Value, timeout: Duration) -> Result<Value> {
        let payload = serde_json::to_vec(&input).context("Failed to encode node input")?;
        let request = self
            .router
            .request(EXECUTOR_SOURCE, service_name, method, Bytes::from(payload))
            .with_timeout(timeout);

        let response = self.router.route_async(request).await;
        if !response.success {
            bail!(
                "{}",
                response
                    .error
                    .unwrap_or_else(|| format!("Call to {service_name} failed"))
            );
        }

        Ok(match response.response {
            Some(body) => serde_json::from_slice(&body)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into_owned())),
            None => Value::Null,
        })
    }
}

// ============================================================================
// Execution state
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionSnapshot {
    pub workflow_id: String,
    pub execution_id: String,
    pub current_nodes: Vec<String>,
    pub completed_nodes: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub error: Option<String>,
}

struct ExecutionState {
    workflow_id: String,
    execution_id: String,
    current_nodes: BTreeSet<String>,
    completed_nodes: Vec<String>,
    node_outputs: HashMap<String, Value>,
    global_state: Map<String, Value>,
    started_at: DateTime<Utc>,
    error: Option<String>,
}

impl ExecutionState {
    fn is_completed(&self, node_id: &str) -> bool {
        self.completed_nodes.iter().any(|n| n == node_id)
    }

    fn snapshot(&self) -> ExecutionSnapshot {
        ExecutionSnapshot {
            workflow_id: self.workflow_id.clone(),
            execution_id: self.execution_id.clone(),
            current_nodes: self.current_nodes.iter().cloned().collect(),
            completed_nodes: self.completed_nodes.clone(),
            started_at: self.started_at,
            error: self.error.clone(),
        }
    }
}

type SharedState = Arc<Mutex<ExecutionState>>;

/// Result of one workflow execution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub execution_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub completed_nodes: Vec<String>,
    /// Global state at the end of a successful run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl ExecutionOutcome {
    fn failed(execution_id: String, error: String) -> Self {
        Self {
            success: false,
            execution_id,
            result: None,
            completed_nodes: Vec::new(),
            state: None,
            duration_seconds: None,
            error: Some(error),
            errors: Vec::new(),
        }
    }
}

// ============================================================================
// WorkflowExecutor
// ============================================================================

pub struct WorkflowExecutor {
    invoker: Option<Arc<dyn ServiceInvoker>>,
    event_store: Option<Arc<EventStore>>,
    active: Mutex<HashMap<String, SharedState>>,
}

impl WorkflowExecutor {
    pub fn new(invoker: Option<Arc<dyn ServiceInvoker>>, event_store: Option<Arc<EventStore>>) -> Self {
        Self {
            invoker,
            event_store,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn active_executions(&self) -> Vec<ExecutionSnapshot> {
        self.active.lock().values().map(|s| s.lock().snapshot()).collect()
    }

    pub async fn execute(&self, graph: &WorkflowGraph, input: Value, timeout: Duration) -> ExecutionOutcome {
        let execution_id = Uuid::new_v4().to_string();

        let errors = graph.validate();
        if !errors.is_empty() {
            warn!(workflow_id = %graph.workflow_id, ?errors, "Refusing to run invalid workflow");
            return ExecutionOutcome {
                errors,
                ..ExecutionOutcome::failed(execution_id, "Invalid workflow".to_string())
            };
        }

        let mut global_state = Map::new();
        global_state.insert("input".into(), input.clone());
        let started_at = Utc::now();
        let state: SharedState = Arc::new(Mutex::new(ExecutionState {
            workflow_id: graph.workflow_id.clone(),
            execution_id: execution_id.clone(),
            current_nodes: BTreeSet::from([START_NODE.to_string()]),
            completed_nodes: Vec::new(),
            node_outputs: HashMap::from([(START_NODE.to_string(), input)]),
            global_state,
            started_at,
            error: None,
        }));
        self.active.lock().insert(execution_id.clone(), state.clone());

        info!(
            workflow_id = %graph.workflow_id,
            execution_id = %execution_id,
            "Workflow execution started"
        );

        if let Some(store) = &self.event_store {
            store
                .start_workflow(
                    &graph.workflow_id,
                    &graph.name,
                    graph.agents(),
                    Some(json!({ "execution_id": execution_id })),
                )
                .await;
        }

        let started = Instant::now();
        let result = match tokio::time::timeout(timeout, self.execute_from_node(graph, &state, START_NODE.to_string())).await {
            Ok(result) => result,
            Err(_) => Err(anyhow!("Workflow execution timeout")),
        };

        let outcome = match result {
            Ok(output) => {
                if let Some(store) = &self.event_store {
                    store
                        .complete_workflow(&graph.workflow_id, true, Some(json!({ "output": output })))
                        .await;
                }
                let (completed_nodes, final_state) = {
                    let s = state.lock();
                    (s.completed_nodes.clone(), Value::Object(s.global_state.clone()))
                };
                ExecutionOutcome {
                    success: true,
                    execution_id: execution_id.clone(),
                    result: Some(output),
                    completed_nodes,
                    state: Some(final_state),
                    duration_seconds: Some(started.elapsed().as_secs_f64()),
                    error: None,
                    errors: Vec::new(),
                }
            }
            Err(e) => {
                let error = format!("{e:#}");
                state.lock().error = Some(error.clone());
                warn!(
                    workflow_id = %graph.workflow_id,
                    execution_id = %execution_id,
                    error = %error,
                    "Workflow execution failed"
                );
                if let Some(store) = &self.event_store {
                    store
                        .complete_workflow(&graph.workflow_id, false, Some(json!({ "error": error })))
                        .await;
                }
                ExecutionOutcome::failed(execution_id.clone(), error)
            }
        };

        self.active.lock().remove(&execution_id);
        outcome
    }

    fn execute_from_node<'a>(
        &'a self,
        graph: &'a WorkflowGraph,
        state: &'a SharedState,
        node_id: String,
    ) -> BoxFuture<'a, Result<Value>> {
        async move {
            let node = graph
                .node(&node_id)
                .ok_or_else(|| anyhow!("Node {node_id} not found"))?;
            state.lock().current_nodes.insert(node_id.clone());

            let output = match node.node_type {
                NodeType::Start | NodeType::End => state
                    .lock()
                    .node_outputs
                    .get(&node_id)
                    .cloned()
                    .unwrap_or(Value::Null),
                _ => {
                    // A failing node with a fallback edge hands over to it.
                    match self.execute_node(graph, state, node).await {
                        Ok(output) => {
                            state.lock().node_outputs.insert(node_id.clone(), output.clone());
                            output
                        }
                        Err(e) => {
                            {
                                let mut s = state.lock();
                                s.current_nodes.remove(&node_id);
                            }
                            let Some(fallback) = graph.fallback_target(&node_id) else {
                                return Err(e);
                            };
                            warn!(node = %node_id, fallback = %fallback, error = %e, "Node failed, using fallback");
                            return self.execute_from_node(graph, state, fallback).await;
                        }
                    }
                }
            };

            let context = {
                let mut s = state.lock();
                s.current_nodes.remove(&node_id);
                if !s.is_completed(&node_id) {
                    s.completed_nodes.push(node_id.clone());
                }
                if node.node_type == NodeType::End {
                    return Ok(Value::Object(s.global_state.clone()));
                }
                json!({
                    "current_output": output,
                    "state": Value::Object(s.global_state.clone()),
                    "node_outputs": s.node_outputs,
                })
            };

            let next = graph.next_nodes(&node_id, &context);
            if next.is_empty() {
                return Ok(output);
            }

            let parallel = graph.parallel_targets(&node_id);
            if parallel.len() > 1 {
                debug!(node = %node_id, branches = parallel.len(), "Running parallel branches");
                let results = join_all(
                    parallel
                        .into_iter()
                        .map(|target| self.execute_from_node(graph, state, target)),
                )
                .await;

                let recorded: Vec<Value> = results
                    .iter()
                    .map(|r| match r {
                        Ok(value) => value.clone(),
                        Err(e) => json!({ "error": format!("{e:#}") }),
                    })
                    .collect();
                state
                    .lock()
                    .global_state
                    .insert("parallel_results".into(), Value::Array(recorded));

                let mut first_error = None;
                for result in results {
                    match result {
                        Ok(value) => return Ok(value),
                        Err(e) if first_error.is_none() => first_error = Some(e),
                        Err(_) => {}
                    }
                }
                return Err(first_error.unwrap_or_else(|| anyhow!("No parallel results")));
            }

            let mut next = next;
            self.execute_from_node(graph, state, next.remove(0)).await
        }
        .boxed()
    }

    async fn execute_node(&self, graph: &WorkflowGraph, state: &SharedState, node: &WorkflowNode) -> Result<Value> {
        let turn_number = graph.begin_node_execution(&node.node_id);
        let started = Instant::now();

        let result = self.run_node(graph, state, node).await;

        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        graph.finish_node_execution(&node.node_id, latency_ms, result.is_ok());

        if let (Some(store), Some(service)) = (&self.event_store, &node.service_name) {
            store
                .record_contribution(
                    service,
                    &graph.workflow_id,
                    turn_number.min(u32::MAX as u64) as u32,
                    ActionType::from(node.node_type.as_str()),
                    latency_ms,
                    result.is_ok(),
                    None,
                )
                .await;
        }
        result
    }

    async fn run_node(&self, graph: &WorkflowGraph, state: &SharedState, node: &WorkflowNode) -> Result<Value> {
        let inputs = Self::predecessor_outputs(graph, state, node);

        match node.node_type {
            NodeType::Agent | NodeType::Tool => {
                let input = Self::node_input(state, inputs);
                match (&self.invoker, &node.service_name) {
                    (Some(invoker), Some(service)) => {
                        invoker.invoke(service, NODE_METHOD, input, node.timeout).await.with_context(|| {
                            format!("Node {} ({service}) failed", node.node_id)
                        })
                    }
                    _ => Ok(input),
                }
            }
            NodeType::Aggregator => Ok(match inputs {
                Some(inputs) if inputs.len() > 1 => aggregate(node.aggregation(), inputs),
                other => Self::node_input(state, other),
            }),
            NodeType::Checkpoint => {
                let input = Self::node_input(state, inputs);
                let mut s = state.lock();
                let snapshot = json!({
                    "timestamp": Utc::now().to_rfc3339(),
                    "state": Value::Object(s.global_state.clone()),
                });
                s.global_state.insert(format!("checkpoint_{}", node.node_id), snapshot);
                Ok(input)
            }
            NodeType::Router | NodeType::Human | NodeType::Start | NodeType::End => {
                Ok(Self::node_input(state, inputs))
            }
        }
    }

    /// Outputs of the node's completed predecessors in edge order, `None`
    /// when no predecessor has completed.
    fn predecessor_outputs(
        graph: &WorkflowGraph,
        state: &SharedState,
        node: &WorkflowNode,
    ) -> Option<Vec<(String, Value)>> {
        let s = state.lock();
        let outputs: Vec<(String, Value)> = graph
            .predecessors(&node.node_id)
            .into_iter()
            .filter(|p| s.is_completed(p))
            .map(|p| {
                let output = s.node_outputs.get(&p).cloned().unwrap_or(Value::Null);
                (p, output)
            })
            .collect();
        (!outputs.is_empty()).then_some(outputs)
    }

    fn node_input(state: &SharedState, inputs: Option<Vec<(String, Value)>>) -> Value {
        match inputs {
            None => state.lock().global_state.get("input").cloned().unwrap_or(Value::Null),
            Some(mut inputs) if inputs.len() == 1 => inputs.remove(0).1,
            Some(inputs) => Value::Object(inputs.into_iter().collect()),
        }
    }
}

fn aggregate(method: AggregationMethod, inputs: Vec<(String, Value)>) -> Value {
    match method {
        AggregationMethod::Merge => {
            let mut merged = Map::new();
            for (key, value) in inputs {
                match value {
                    Value::Object(fields) => merged.extend(fields),
                    other => {
                        merged.insert(key, other);
                    }
                }
            }
            Value::Object(merged)
        }
        AggregationMethod::List => Value::Array(inputs.into_iter().map(|(_, v)| v).collect()),
        AggregationMethod::First => inputs
            .into_iter()
            .map(|(_, v)| v)
            .find(|v| !v.is_null())
            .unwrap_or(Value::Null),
    }
}
