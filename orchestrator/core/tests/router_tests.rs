// Copyright (c) 2026 AOL Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Integration tests for the request router
//!
//! A scripted transport stands in for gRPC so the tests cover the worker
//! pool, retries, load balancing and route bookkeeping end to end.

use aol_core::application::event_store::{EventFilter, EventStore};
use aol_core::application::router::Router;
use aol_core::domain::config::RouterConfig;
use aol_core::domain::events::EventType;
use aol_core::domain::registry::ServiceRegistry;
use aol_core::domain::routing::{RouteRequest, RouteTransport, RoutingStrategy, TransportError};
use aol_core::domain::service::{ServiceInstance, ServiceStatus};
use aol_core::infrastructure::event_bus::EventBus;
use aol_core::infrastructure::registry::InMemoryServiceRegistry;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Fails the first `failures` calls, then echoes the payload.
struct ScriptedTransport {
    failures: Mutex<u32>,
    delay: Duration,
    calls: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    fn new(failures: u32) -> Self {
        Self {
            failures: Mutex::new(failures),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new(0)
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl RouteTransport for ScriptedTransport {
    async fn forward(&self, address: &str, request: &RouteRequest) -> Result<Bytes, TransportError> {
        self.calls.lock().push(address.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let mut failures = self.failures.lock();
        if *failures > 0 {
            *failures -= 1;
            return Err(TransportError::Call("unavailable".to_string()));
        }
        Ok(request.payload.clone())
    }

    fn pool_size(&self) -> usize {
        0
    }

    async fn close(&self) {}
}

fn instance(name: &str, port: u16, status: ServiceStatus) -> ServiceInstance {
    let mut instance = ServiceInstance::new(
        json!({
            "apiVersion": "v1",
            "kind": "AOLAgent",
            "metadata": { "name": name, "version": "1.0.0" },
            "spec": { "endpoints": { "grpc": port.to_string(), "health": (port + 1).to_string() } }
        }),
        "10.0.0.7",
        port,
        port + 1,
        port + 2,
    );
    instance.status = status;
    instance
}

struct Harness {
    router: Router,
    store: Arc<EventStore>,
    transport: Arc<ScriptedTransport>,
}

async fn harness(transport: ScriptedTransport, instances: Vec<ServiceInstance>) -> Harness {
    let registry = Arc::new(InMemoryServiceRegistry::new());
    for instance in instances {
        registry.register(instance).await.unwrap();
    }
    let store = Arc::new(EventStore::new(100, EventBus::with_default_capacity()));
    let transport = Arc::new(transport);
    let config = RouterConfig {
        workers: 2,
        queue_capacity: 16,
        request_timeout: Duration::from_secs(2),
        max_retries: 3,
    };
    let router = Router::new(&config, registry, transport.clone(), Some(store.clone()));
    router.start(config.workers);
    Harness {
        router,
        store,
        transport,
    }
}

#[tokio::test]
async fn test_route_success_records_event() {
    let h = harness(ScriptedTransport::new(0), vec![instance("planner", 50051, ServiceStatus::Healthy)]).await;

    let request = h
        .router
        .request("gateway", "planner", "Plan", Bytes::from_static(b"{\"goal\":\"ship\"}"));
    let response = h.router.route_async(request).await;

    assert!(response.success, "{:?}", response.error);
    assert_eq!(response.response.as_deref(), Some(&b"{\"goal\":\"ship\"}"[..]));
    assert_eq!(response.target_instance.as_deref(), Some("10.0.0.7:50051"));
    assert_eq!(response.retry_count, 0);

    let events = h.store.get_route_events(Some("gateway"), Some("planner"), 10).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::RouteCalled);
    assert_eq!(events[0].success, Some(true));
    assert_eq!(events[0].method.as_deref(), Some("Plan"));

    h.router.stop().await;
}

#[tokio::test]
async fn test_failed_attempts_are_retried() {
    let h = harness(ScriptedTransport::new(2), vec![instance("planner", 50061, ServiceStatus::Healthy)]).await;

    let response = h
        .router
        .route_async(h.router.request("gateway", "planner", "Plan", Bytes::new()))
        .await;

    assert!(response.success);
    assert_eq!(response.retry_count, 2);
    assert_eq!(h.transport.calls().len(), 3);

    let metrics = h.router.load_balancer().instance_metrics("10.0.0.7:50061").unwrap();
    assert_eq!(metrics.total_requests, 3);
    assert_eq!(metrics.active_connections, 0);

    h.router.stop().await;
}

#[tokio::test]
async fn test_exhausted_retries_fail_and_are_recorded() {
    let h = harness(ScriptedTransport::new(10), vec![instance("planner", 50071, ServiceStatus::Healthy)]).await;

    let request = h
        .router
        .request("gateway", "planner", "Plan", Bytes::new())
        .with_max_retries(1);
    let response = h.router.route_async(request).await;

    assert!(!response.success);
    assert_eq!(response.retry_count, 1);
    assert!(response.error.unwrap().contains("unavailable"));

    let failures = h
        .store
        .get_events(
            &EventFilter {
                event_type: Some(EventType::RouteCalled),
                ..Default::default()
            },
            10,
        )
        .await;
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].success, Some(false));

    h.router.stop().await;
}

#[tokio::test]
async fn test_unknown_target_fails_without_event() {
    let h = harness(ScriptedTransport::new(0), Vec::new()).await;

    let response = h
        .router
        .route_async(h.router.request("gateway", "ghost", "Call", Bytes::new()))
        .await;

    assert!(!response.success);
    assert_eq!(response.error.as_deref(), Some("No instances found for service ghost"));
    assert!(h.transport.calls().is_empty());
    assert_eq!(h.store.len().await, 0);

    h.router.stop().await;
}

#[tokio::test]
async fn test_unhealthy_instances_are_avoided() {
    let h = harness(
        ScriptedTransport::new(0),
        vec![
            instance("writer", 50081, ServiceStatus::Unhealthy),
            instance("writer", 50091, ServiceStatus::Healthy),
        ],
    )
    .await;

    for _ in 0..3 {
        let request = h
            .router
            .request("gateway", "writer", "Write", Bytes::new())
            .with_strategy(RoutingStrategy::RoundRobin);
        assert!(h.router.route_async(request).await.success);
    }
    assert!(h.transport.calls().iter().all(|a| a == "10.0.0.7:50091"));

    h.router.stop().await;
}

#[tokio::test]
async fn test_request_timeout() {
    let h = harness(
        ScriptedTransport::slow(Duration::from_millis(300)),
        vec![instance("planner", 50101, ServiceStatus::Healthy)],
    )
    .await;

    let request = h
        .router
        .request("gateway", "planner", "Plan", Bytes::new())
        .with_timeout(Duration::from_millis(50));
    let response = h.router.route_async(request).await;

    assert!(!response.success);
    assert_eq!(response.error.as_deref(), Some("Request timeout"));

    h.router.stop().await;
}

#[tokio::test]
async fn test_conditional_routing_picks_matching_target() {
    use aol_core::domain::routing::Condition;

    let h = harness(
        ScriptedTransport::new(0),
        vec![
            instance("searcher", 50111, ServiceStatus::Healthy),
            instance("chatter", 50121, ServiceStatus::Healthy),
        ],
    )
    .await;
    let rules = h.router.conditional_router();
    rules.add_rule("classifier", Condition::equals("/intent", "search"), "searcher", 10);
    rules.add_rule("classifier", Condition::Always, "chatter", 0);

    let response = h
        .router
        .route_conditional("classifier", &json!({ "intent": "search" }), Bytes::new(), HashMap::new())
        .await
        .unwrap();
    assert_eq!(response.target_instance.as_deref(), Some("10.0.0.7:50111"));

    assert!(h
        .router
        .route_conditional("unrouted", &json!({}), Bytes::new(), HashMap::new())
        .await
        .is_none());

    h.router.stop().await;
}

#[tokio::test]
async fn test_stats_and_restart() {
    let h = harness(ScriptedTransport::new(0), Vec::new()).await;
    assert_eq!(h.router.stats().active_workers, 2);

    // Starting again while running is a no-op
    h.router.start(4);
    assert_eq!(h.router.stats().active_workers, 2);

    h.router.stop().await;
    assert_eq!(h.router.stats().active_workers, 0);
    assert_eq!(h.router.stats().pending_requests, 0);
}
