// Copyright (c) 2026 AOL Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Integration tests for the event store: channel fan-out, workflow
//! lifecycle bookkeeping and lazy agent detection.

use aol_core::application::event_store::{EventFilter, EventStore, WorkflowState, GLOBAL_CHANNEL};
use aol_core::domain::credit::ActionType;
use aol_core::domain::events::{Event, EventType};
use aol_core::infrastructure::event_bus::EventBus;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn store() -> EventStore {
    EventStore::new(1000, EventBus::with_default_capacity())
}

async fn next(rx: &mut tokio::sync::mpsc::Receiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("no event delivered")
        .expect("channel closed")
}

#[tokio::test]
async fn test_events_fan_out_to_service_workflow_and_global_channels() {
    let store = store();
    let mut service_rx = store.bus().subscribe("service:planner", "dashboard");
    let mut workflow_rx = store.bus().subscribe("workflow:wf-1", "dashboard");
    let mut global_rx = store.bus().subscribe(GLOBAL_CHANNEL, "dashboard");
    let mut other_rx = store.bus().subscribe("service:writer", "dashboard");

    store
        .record_contribution("planner", "wf-1", 1, ActionType::Reasoning, 12.0, true, None)
        .await;

    let on_service = next(&mut service_rx).await;
    let on_workflow = next(&mut workflow_rx).await;
    let on_global = next(&mut global_rx).await;
    assert_eq!(on_service.event_type, EventType::AgentContribution);
    assert_eq!(on_service.event_id, on_workflow.event_id);
    assert_eq!(on_service.event_id, on_global.event_id);
    assert_eq!(on_service.contribution_score, Some(1.2));
    assert!(other_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_firehose_and_handlers_see_every_event() {
    let store = store();
    let mut firehose = store.bus().subscribe_all();
    let handled = Arc::new(AtomicUsize::new(0));
    {
        let handled = handled.clone();
        store.bus().register_handler(EventType::HealthChanged, move |_event| {
            let handled = handled.clone();
            async move {
                handled.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
    }

    store
        .add_event(
            Event::new(EventType::HealthChanged)
                .with_service("planner")
                .with_status_change("starting", "healthy"),
        )
        .await;
    store.add_event(Event::new(EventType::RouteCalled)).await;

    assert_eq!(firehose.recv().await.unwrap().event_type, EventType::HealthChanged);
    assert_eq!(firehose.recv().await.unwrap().event_type, EventType::RouteCalled);
    assert_eq!(handled.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_workflow_lifecycle_with_lazy_detection() {
    let store = store();
    let agents = vec!["proposer".to_string(), "critic".to_string(), "observer".to_string()];
    store
        .start_workflow("debate-7", "debate", agents, Some(json!({ "topic": "caching" })))
        .await;

    for turn in 1..=4 {
        store
            .record_contribution("proposer", "debate-7", turn, ActionType::Decision, 20.0, true, None)
            .await;
    }
    store
        .record_contribution("critic", "debate-7", 5, ActionType::Verification, 15.0, true, None)
        .await;
    store
        .record_contribution("observer", "debate-7", 6, ActionType::Delegation, 5.0, false, None)
        .await;

    // proposer 6.0, critic 1.0, observer 0.0 from a total of 7.0
    let lazy = store.check_lazy_agents("debate-7", 0.1).await;
    assert_eq!(lazy, vec!["observer"]);
    assert_eq!(store.get_agent_report("observer").lazy_flags, 1);

    let report = store.get_workflow_report("debate-7").unwrap();
    assert_eq!(report.state, Some(WorkflowState::Running));
    assert_eq!(report.total_contributions, 6);
    assert_eq!(report.agent_stats["proposer"].contributions, 4);
    assert_eq!(report.agent_stats["observer"].successes, 0);

    store.complete_workflow("debate-7", true, Some(json!({ "verdict": "ship" }))).await;

    let completed = store
        .get_events(
            &EventFilter {
                event_type: Some(EventType::WorkflowCompleted),
                workflow_id: Some("debate-7".to_string()),
                ..Default::default()
            },
            10,
        )
        .await;
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].metadata_field("total_contributions"), Some(&json!(6)));
    assert_eq!(
        completed[0].metadata_field("result"),
        Some(&json!({ "verdict": "ship" }))
    );

    let started = store
        .get_events(
            &EventFilter {
                event_type: Some(EventType::WorkflowStarted),
                ..Default::default()
            },
            10,
        )
        .await;
    assert_eq!(started[0].metadata_field("topic"), Some(&json!("caching")));

    let stats = store.get_stats().await;
    assert_eq!(stats.completed_workflows, 1);
    assert_eq!(stats.active_workflows, 0);
    assert_eq!(stats.agent_count, 3);
    assert_eq!(stats.total_contributions, 6);
    assert_eq!(stats.lazy_agent_flags, 1);
}

#[tokio::test]
async fn test_filters_and_route_queries() {
    let store = store();
    store
        .add_event(Event::new(EventType::RouteCalled).with_route("gateway", "planner", "plan").with_success(true))
        .await;
    store
        .add_event(Event::new(EventType::RouteCalled).with_route("planner", "writer", "write").with_success(false))
        .await;
    store
        .add_event(Event::new(EventType::ServiceRegistered).with_service("writer"))
        .await;

    let involving_writer = store
        .get_events(
            &EventFilter {
                service_name: Some("writer".to_string()),
                ..Default::default()
            },
            10,
        )
        .await;
    assert_eq!(involving_writer.len(), 2);

    let from_planner = store.get_route_events(Some("planner"), None, 10).await;
    assert_eq!(from_planner.len(), 1);
    assert_eq!(from_planner[0].success, Some(false));

    let latest = store.get_events(&EventFilter::default(), 1).await;
    assert_eq!(latest[0].event_type, EventType::ServiceRegistered);
}
