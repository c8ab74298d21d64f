// Copyright (c) 2026 AOL Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Integration tests for workflow execution
//!
//! These tests verify the execution pipeline:
//! 1. Build or parse a workflow graph
//! 2. Run it through the WorkflowExecutor
//! 3. Check node outputs, fallbacks and timeouts
//! 4. Verify workflow lifecycle and contributions in the event store

use anyhow::{bail, Result};
use aol_core::application::event_store::{EventStore, WorkflowState};
use aol_core::application::router::Router;
use aol_core::application::workflow_executor::{RouterInvoker, ServiceInvoker, WorkflowExecutor};
use aol_core::domain::config::RouterConfig;
use aol_core::domain::registry::ServiceRegistry;
use aol_core::domain::routing::{Condition, RouteRequest, RouteTransport, TransportError};
use aol_core::domain::service::{ServiceInstance, ServiceStatus};
use aol_core::domain::workflow::{
    AggregationMethod, EdgeType, NodeType, WorkflowBuilder, WorkflowDefinition, WorkflowGraph, WorkflowNode,
    END_NODE, START_NODE,
};
use aol_core::infrastructure::event_bus::EventBus;
use aol_core::infrastructure::registry::InMemoryServiceRegistry;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Tags its input with the service name; selected services fail or stall.
#[derive(Default)]
struct RecordingInvoker {
    failing: Vec<String>,
    stall: Option<Duration>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl RecordingInvoker {
    fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ServiceInvoker for RecordingInvoker {
    async fn invoke(&self, service_name: &str, _method: &str, input: Value, _timeout: Duration) -> Result<Value> {
        self.calls.lock().push((service_name.to_string(), input.clone()));
        if let Some(stall) = self.stall {
            tokio::time::sleep(stall).await;
        }
        if self.failing.iter().any(|s| s == service_name) {
            bail!("{service_name} is down");
        }
        Ok(json!({ "by": service_name, "input": input }))
    }
}

fn store() -> Arc<EventStore> {
    Arc::new(EventStore::new(500, EventBus::with_default_capacity()))
}

#[tokio::test]
async fn test_sequential_workflow_threads_outputs() {
    let invoker = Arc::new(RecordingInvoker::default());
    let store = store();
    let executor = WorkflowExecutor::new(Some(invoker.clone()), Some(store.clone()));

    let graph = WorkflowBuilder::new("review", "plan then write")
        .add_agent("plan", "planner", None)
        .add_agent("write", "writer", None)
        .build();

    let outcome = executor
        .execute(&graph, json!({ "topic": "rust" }), Duration::from_secs(5))
        .await;

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(outcome.completed_nodes, vec![START_NODE, "plan", "write", END_NODE]);
    assert_eq!(outcome.result, Some(json!({ "input": { "topic": "rust" } })));

    let calls = invoker.calls();
    assert_eq!(calls[0], ("planner".to_string(), json!({ "topic": "rust" })));
    // The writer receives the planner's output
    assert_eq!(calls[1].1["by"], "planner");

    let report = store.get_workflow_report(&graph.workflow_id).unwrap();
    assert_eq!(report.state, Some(WorkflowState::Completed));
    assert_eq!(report.total_contributions, 2);
    assert_eq!(store.get_agent_report("writer").successful_contributions, 1);

    let stats = graph.node_stats("plan");
    assert_eq!(stats.execution_count, 1);
    assert_eq!(stats.success_rate(), 1.0);
    assert!(executor.active_executions().is_empty());
}

#[tokio::test]
async fn test_failed_node_uses_fallback() {
    let invoker = Arc::new(RecordingInvoker {
        failing: vec!["primary".to_string()],
        ..Default::default()
    });
    let executor = WorkflowExecutor::new(Some(invoker.clone()), None);

    let graph = WorkflowBuilder::new("resilient", "")
        .add_agent("answer", "primary", None)
        .add_node(WorkflowNode::agent("backup", "secondary"))
        .connect("backup", END_NODE)
        .set_fallback("answer", "backup")
        .build();
    assert!(graph.validate().is_empty(), "{:?}", graph.validate());

    let outcome = executor.execute(&graph, json!("question"), Duration::from_secs(5)).await;

    assert!(outcome.success, "{:?}", outcome.error);
    assert!(outcome.completed_nodes.contains(&"backup".to_string()));
    assert!(!outcome.completed_nodes.contains(&"answer".to_string()));
    let services: Vec<String> = invoker.calls().into_iter().map(|(s, _)| s).collect();
    assert_eq!(services, vec!["primary", "secondary"]);
}

#[tokio::test]
async fn test_failure_without_fallback_fails_workflow() {
    let invoker = Arc::new(RecordingInvoker {
        failing: vec!["writer".to_string()],
        ..Default::default()
    });
    let store = store();
    let executor = WorkflowExecutor::new(Some(invoker), Some(store.clone()));

    let graph = WorkflowBuilder::new("review", "")
        .add_agent("plan", "planner", None)
        .add_agent("write", "writer", None)
        .build();

    let outcome = executor.execute(&graph, json!({}), Duration::from_secs(5)).await;

    assert!(!outcome.success);
    let error = outcome.error.unwrap();
    assert!(error.contains("Node write (writer) failed"), "{error}");
    assert!(error.contains("writer is down"), "{error}");

    let report = store.get_workflow_report(&graph.workflow_id).unwrap();
    assert_eq!(report.state, Some(WorkflowState::Failed));
    assert_eq!(store.get_agent_report("writer").successful_contributions, 0);
}

#[tokio::test]
async fn test_execution_timeout() {
    let invoker = Arc::new(RecordingInvoker {
        stall: Some(Duration::from_millis(500)),
        ..Default::default()
    });
    let executor = WorkflowExecutor::new(Some(invoker), None);
    let graph = WorkflowBuilder::new("slow", "")
        .add_agent("think", "thinker", None)
        .build();

    let outcome = executor.execute(&graph, json!({}), Duration::from_millis(50)).await;

    assert!(!outcome.success);
    assert_eq!(outcome.error.as_deref(), Some("Workflow execution timeout"));
}

#[tokio::test]
async fn test_parallel_branches_are_collected() {
    let invoker = Arc::new(RecordingInvoker {
        failing: vec!["auditor".to_string()],
        ..Default::default()
    });
    let executor = WorkflowExecutor::new(Some(invoker.clone()), None);

    // Branches stop at their own output unless it is marked final.
    let finished = Condition::Truthy {
        path: "/current_output/final".to_string(),
    };
    let mut graph = WorkflowBuilder::new("fan-out", "")
        .add_agent("dispatch", "dispatcher", None)
        .add_parallel(&["research", "draft", "audit"])
        .add_node(WorkflowNode::agent("research", "researcher"))
        .add_node(WorkflowNode::agent("draft", "drafter"))
        .add_node(WorkflowNode::agent("audit", "auditor"))
        .build();
    for branch in ["research", "draft", "audit"] {
        graph.add_edge(branch, END_NODE, EdgeType::Conditional, Some(finished.clone()), 0);
    }
    assert!(graph.validate().is_empty(), "{:?}", graph.validate());

    let outcome = executor.execute(&graph, json!({ "topic": "rust" }), Duration::from_secs(5)).await;
    assert!(outcome.success, "{:?}", outcome.error);

    let dispatched = json!({ "by": "dispatcher", "input": { "topic": "rust" } });
    let research = json!({ "by": "researcher", "input": dispatched });
    let draft = json!({ "by": "drafter", "input": dispatched });
    assert_eq!(outcome.result, Some(research.clone()));

    let results = outcome.state.as_ref().unwrap()["parallel_results"].as_array().unwrap().clone();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0], research);
    assert_eq!(results[1], draft);
    assert!(results[2]["error"].as_str().unwrap().contains("auditor is down"));

    assert!(outcome.completed_nodes.contains(&"research".to_string()));
    assert!(outcome.completed_nodes.contains(&"draft".to_string()));
    assert!(!outcome.completed_nodes.contains(&"audit".to_string()));
}

#[tokio::test]
async fn test_aggregator_combines_completed_predecessors() {
    let review = json!({ "by": "reviewer", "input": "brief" });
    let cases = [
        (
            AggregationMethod::Merge,
            json!({ "intake": "brief", "by": "reviewer", "input": "brief" }),
        ),
        (AggregationMethod::List, json!(["brief", review])),
        (AggregationMethod::First, json!("brief")),
    ];

    for (method, expected) in cases {
        let invoker = Arc::new(RecordingInvoker::default());
        let executor = WorkflowExecutor::new(Some(invoker.clone()), None);

        // intake (pass-through tool) -> review -> combine, with intake also feeding combine
        let mut graph = WorkflowGraph::new(format!("wf-{}", method.as_str()), "combine", "");
        graph.add_node(WorkflowNode::new("intake", NodeType::Tool));
        graph.add_node(WorkflowNode::agent("review", "reviewer"));
        graph.add_node(
            WorkflowNode::new("combine", NodeType::Aggregator)
                .with_config(json!({ "aggregation": method.as_str() })),
        );
        graph.add_node(WorkflowNode::agent("publish", "publisher"));
        graph.set_entry_point("intake");
        graph.add_edge("intake", "combine", EdgeType::Sequential, None, 0);
        graph.add_edge("intake", "review", EdgeType::Sequential, None, 1);
        graph.connect("review", "combine");
        graph.connect("combine", "publish");
        graph.set_exit_point("publish");
        assert!(graph.validate().is_empty(), "{:?}", graph.validate());
        assert_eq!(graph.predecessors("combine"), vec!["intake", "review"]);

        let outcome = executor.execute(&graph, json!("brief"), Duration::from_secs(5)).await;
        assert!(outcome.success, "{:?}", outcome.error);

        let calls = invoker.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].0, "publisher");
        assert_eq!(calls[1].1, expected, "aggregation {}", method.as_str());
    }
}

#[tokio::test]
async fn test_checkpoint_snapshots_global_state() {
    let invoker = Arc::new(RecordingInvoker::default());
    let executor = WorkflowExecutor::new(Some(invoker.clone()), None);

    let graph = WorkflowBuilder::new("durable", "")
        .add_agent("plan", "planner", None)
        .add_node(WorkflowNode::new("save", NodeType::Checkpoint))
        .connect("plan", "save")
        .add_node(WorkflowNode::agent("write", "writer"))
        .connect("save", "write")
        .connect("write", END_NODE)
        .build();
    assert!(graph.validate().is_empty(), "{:?}", graph.validate());

    let outcome = executor.execute(&graph, json!({ "goal": "ship" }), Duration::from_secs(5)).await;
    assert!(outcome.success, "{:?}", outcome.error);

    let state = outcome.state.unwrap();
    let checkpoint = &state["checkpoint_save"];
    assert_eq!(checkpoint["state"], json!({ "input": { "goal": "ship" } }));
    assert!(checkpoint["timestamp"].as_str().is_some());

    // The checkpoint passes its input through to the next node
    let calls = invoker.calls();
    assert_eq!(calls[1].0, "writer");
    assert_eq!(calls[1].1["by"], "planner");
}

#[tokio::test]
async fn test_conditional_edges_from_definition() {
    let yaml = r#"
name: triage
nodes:
  - { node_id: classify, node_type: agent, service_name: classifier }
  - { node_id: search, node_type: agent, service_name: searcher }
  - { node_id: chat, node_type: agent, service_name: chatter }
entry: classify
edges:
  - source: classify
    target: search
    type: conditional
    priority: 10
    condition: { type: equals, path: /current_output/input/intent, value: search }
  - source: classify
    target: chat
    type: conditional
    condition: { type: always }
exit: [search, chat]
"#;
    let graph = WorkflowDefinition::from_yaml(yaml).unwrap().into_graph();
    assert!(graph.validate().is_empty(), "{:?}", graph.validate());

    let invoker = Arc::new(RecordingInvoker::default());
    let executor = WorkflowExecutor::new(Some(invoker.clone()), None);
    let outcome = executor
        .execute(&graph, json!({ "intent": "search" }), Duration::from_secs(5))
        .await;

    assert!(outcome.success, "{:?}", outcome.error);
    let services: Vec<String> = invoker.calls().into_iter().map(|(s, _)| s).collect();
    assert_eq!(services, vec!["classifier", "searcher"]);
}

/// Replies with a fixed JSON document.
struct JsonTransport;

#[async_trait]
impl RouteTransport for JsonTransport {
    async fn forward(&self, _address: &str, request: &RouteRequest) -> Result<Bytes, TransportError> {
        let input: Value = serde_json::from_slice(&request.payload).unwrap_or(Value::Null);
        let reply = json!({ "echo": input, "method": request.method });
        Ok(Bytes::from(reply.to_string()))
    }

    fn pool_size(&self) -> usize {
        0
    }

    async fn close(&self) {}
}

#[tokio::test]
async fn test_router_backed_execution() {
    let registry = Arc::new(InMemoryServiceRegistry::new());
    let mut instance = ServiceInstance::new(
        json!({
            "apiVersion": "v1",
            "kind": "AOLAgent",
            "metadata": { "name": "summarizer", "version": "1.0.0" },
            "spec": { "endpoints": { "grpc": "50300", "health": "50301" } }
        }),
        "127.0.0.1",
        50300,
        50301,
        9300,
    );
    instance.status = ServiceStatus::Healthy;
    registry.register(instance).await.unwrap();

    let router = Arc::new(Router::new(
        &RouterConfig::default(),
        registry,
        Arc::new(JsonTransport),
        None,
    ));
    router.start(1);

    let executor = WorkflowExecutor::new(Some(Arc::new(RouterInvoker::new(router.clone()))), None);
    let graph = WorkflowBuilder::new("summarize", "")
        .add_agent("sum", "summarizer", None)
        .build();

    let outcome = executor
        .execute(&graph, json!({ "text": "long" }), Duration::from_secs(5))
        .await;
    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(graph.node_stats("sum").execution_count, 1);

    // Unknown services surface the router's error
    let missing = WorkflowBuilder::new("missing", "")
        .add_agent("x", "nobody", None)
        .build();
    let outcome = executor.execute(&missing, json!({}), Duration::from_secs(5)).await;
    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("No instances found for service nobody"));

    router.stop().await;
}
