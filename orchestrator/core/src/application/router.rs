// Copyright (c) 2026 AOL Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Request Router Application Service
//!
//! Event-driven router that moves calls between registered services. Callers
//! enqueue a [`RouteRequest`] and await its completion; a pool of workers
//! drains the queue, picks an instance with the [`LoadBalancer`] and forwards
//! the payload through a [`RouteTransport`].
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Queueing, load balancing, retries and route bookkeeping
//! - **Dependencies:** Domain (Routing, Registry), Application (EventStore)
//!
//! # Worker Loop
//!
//! ```text
//! loop {
//!     request = queue.dequeue(1s)      // or exit on cancellation
//!     instances = registry.get_instances(request.target_service)
//!     loop {
//!         instance = balancer.select_instance(instances, strategy)
//!         result = transport.forward(instance, request)
//!         balancer.update_metrics(instance, latency, result.is_ok())
//!         if result.is_ok() || request.retry_count == request.max_retries { break }
//!         request.retry_count += 1
//!     }
//!     event_store.add_event(route_called)
//!     queue.complete(request_id, response)
//! }
//! ```

use crate::application::event_store::EventStore;
use crate::domain::config::RouterConfig;
use crate::domain::events::{Event, EventType};
use crate::domain::registry::ServiceRegistry;
use crate::domain::routing::{
    Condition, InstanceMetrics, RouteRequest, RouteResponse, RouteTransport, RoutingStrategy,
};
use crate::domain::service::ServiceInstance;
use crate::infrastructure::telemetry;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{json, Value};
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const DEQUEUE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouterError {
    #[error("Request queue is closed")]
    QueueClosed,

    #[error("{0}")]
    Failed(String),

    #[error("Request was dropped before completion")]
    Dropped,
}

type Completion = oneshot::Sender<Result<RouteResponse, RouterError>>;

// ============================================================================
// RequestQueue
// ============================================================================

/// Bounded FIFO of pending requests with per-request completion slots
pub struct RequestQueue {
    capacity: usize,
    tx: mpsc::Sender<RouteRequest>,
    rx: tokio::sync::Mutex<mpsc::Receiver<RouteRequest>>,
    completions: Mutex<HashMap<String, Completion>>,
}

impl RequestQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            capacity,
            tx,
            rx: tokio::sync::Mutex::new(rx),
            completions: Mutex::new(HashMap::new()),
        }
    }

    /// Queues a request; waits for room when the queue is full.
    pub async fn enqueue(
        &self,
        request: RouteRequest,
    ) -> Result<oneshot::Receiver<Result<RouteResponse, RouterError>>, RouterError> {
        let (done_tx, done_rx) = oneshot::channel();
        let request_id = request.request_id.clone();
        self.completions.lock().insert(request_id.clone(), done_tx);

        if self.tx.send(request).await.is_err() {
            self.completions.lock().remove(&request_id);
            return Err(RouterError::QueueClosed);
        }
        Ok(done_rx)
    }

    /// Next request, or `None` when nothing arrived within `timeout`.
    pub async fn dequeue(&self, timeout: Duration) -> Option<RouteRequest> {
        let mut rx = self.rx.lock().await;
        tokio::time::timeout(timeout, rx.recv()).await.ok().flatten()
    }

    pub fn complete(&self, request_id: &str, response: RouteResponse) {
        if let Some(done) = self.completions.lock().remove(request_id) {
            let _ = done.send(Ok(response));
        }
    }

    pub fn fail(&self, request_id: &str, error: impl Into<String>) {
        if let Some(done) = self.completions.lock().remove(request_id) {
            let _ = done.send(Err(RouterError::Failed(error.into())));
        }
    }

    /// Requests waiting in the queue
    pub fn pending_count(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    /// Requests accepted but not yet completed
    pub fn in_flight_count(&self) -> usize {
        self.completions.lock().len()
    }
}

// ============================================================================
// LoadBalancer
// ============================================================================

#[derive(Default)]
pub struct LoadBalancer {
    metrics: RwLock<HashMap<String, InstanceMetrics>>,
    cursor: AtomicUsize,
}

impl LoadBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_metrics(&self, instance_id: &str, latency_ms: f64, success: bool) {
        self.metrics
            .write()
            .entry(instance_id.to_string())
            .or_default()
            .record(latency_ms, success);
    }

    pub fn increment_connections(&self, instance_id: &str) {
        self.metrics
            .write()
            .entry(instance_id.to_string())
            .or_default()
            .active_connections += 1;
    }

    pub fn decrement_connections(&self, instance_id: &str) {
        if let Some(metrics) = self.metrics.write().get_mut(instance_id) {
            metrics.active_connections = metrics.active_connections.saturating_sub(1);
        }
    }

    pub fn instance_metrics(&self, instance_id: &str) -> Option<InstanceMetrics> {
        self.metrics.read().get(instance_id).cloned()
    }

    pub fn instance_count(&self) -> usize {
        self.metrics.read().len()
    }

    /// Picks an instance for `strategy`, preferring healthy instances and
    /// falling back to every instance when none is healthy.
    pub fn select_instance<'a>(
        &self,
        instances: &'a [ServiceInstance],
        strategy: RoutingStrategy,
    ) -> Option<&'a ServiceInstance> {
        let healthy: Vec<&ServiceInstance> = instances.iter().filter(|i| i.is_healthy()).collect();
        let candidates: Vec<&ServiceInstance> = if healthy.is_empty() {
            instances.iter().collect()
        } else {
            healthy
        };
        let first = *candidates.first()?;

        let metrics = self.metrics.read();
        let selected = match strategy {
            RoutingStrategy::RoundRobin => {
                let index = self.cursor.fetch_add(1, Ordering::Relaxed) % candidates.len();
                candidates[index]
            }
            RoutingStrategy::HealthAware => best_by(&candidates, |i| {
                metrics.get(&i.address()).map(|m| m.health_score).unwrap_or(1.0)
            }),
            RoutingStrategy::LatencyBased => best_by(&candidates, |i| {
                -metrics.get(&i.address()).map(|m| m.avg_latency_ms()).unwrap_or(0.0)
            }),
            RoutingStrategy::LeastConnections => best_by(&candidates, |i| {
                -(metrics.get(&i.address()).map(|m| m.active_connections).unwrap_or(0) as f64)
            }),
            RoutingStrategy::Weighted | RoutingStrategy::Conditional => first,
        };
        Some(selected)
    }
}

/// Highest scoring candidate; the earliest wins ties.
fn best_by<'a>(candidates: &[&'a ServiceInstance], score: impl Fn(&ServiceInstance) -> f64) -> &'a ServiceInstance {
    let mut best = candidates[0];
    let mut best_score = score(best);
    for &candidate in &candidates[1..] {
        let candidate_score = score(candidate);
        if candidate_score > best_score {
            best = candidate;
            best_score = candidate_score;
        }
    }
    best
}

// ============================================================================
// ConditionalRouter
// ============================================================================

#[derive(Debug, Clone)]
pub struct RoutingRule {
    pub condition: Condition,
    pub target: String,
    pub priority: i32,
}

/// Per-node routing rules evaluated against a JSON context
#[derive(Default)]
pub struct ConditionalRouter {
    rules: RwLock<HashMap<String, Vec<RoutingRule>>>,
}

impl ConditionalRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rule(&self, source_node: &str, condition: Condition, target_node: &str, priority: i32) {
        let mut rules = self.rules.write();
        let node_rules = rules.entry(source_node.to_string()).or_default();
        node_rules.push(RoutingRule {
            condition,
            target: target_node.to_string(),
            priority,
        });
        node_rules.sort_by_key(|rule| Reverse(rule.priority));
    }

    pub fn next_node(&self, source_node: &str, context: &Value) -> Option<String> {
        self.rules
            .read()
            .get(source_node)?
            .iter()
            .find(|rule| rule.condition.evaluate(context))
            .map(|rule| rule.target.clone())
    }

    pub fn rule_count(&self, source_node: &str) -> usize {
        self.rules.read().get(source_node).map_or(0, Vec::len)
    }
}

// ============================================================================
// Router
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RouterStats {
    pub pending_requests: usize,
    pub in_flight_requests: usize,
    pub active_workers: usize,
    pub channel_pool_size: usize,
    pub instance_count: usize,
}

struct RouterCore {
    queue: RequestQueue,
    balancer: LoadBalancer,
    registry: Arc<dyn ServiceRegistry>,
    transport: Arc<dyn RouteTransport>,
    event_store: Option<Arc<EventStore>>,
}

pub struct Router {
    core: Arc<RouterCore>,
    conditional: ConditionalRouter,
    workers: Mutex<Vec<JoinHandle<()>>>,
    cancel: Mutex<CancellationToken>,
    request_timeout: Duration,
    max_retries: u32,
}

impl Router {
    pub fn new(
        config: &RouterConfig,
        registry: Arc<dyn ServiceRegistry>,
        transport: Arc<dyn RouteTransport>,
        event_store: Option<Arc<EventStore>>,
    ) -> Self {
        Self {
            core: Arc::new(RouterCore {
                queue: RequestQueue::new(config.queue_capacity),
                balancer: LoadBalancer::new(),
                registry,
                transport,
                event_store,
            }),
            conditional: ConditionalRouter::new(),
            workers: Mutex::new(Vec::new()),
            cancel: Mutex::new(CancellationToken::new()),
            request_timeout: config.request_timeout,
            max_retries: config.max_retries,
        }
    }

    pub fn conditional_router(&self) -> &ConditionalRouter {
        &self.conditional
    }

    pub fn load_balancer(&self) -> &LoadBalancer {
        &self.core.balancer
    }

    /// A request carrying the configured timeout and retry budget.
    pub fn request(
        &self,
        source_service: &str,
        target_service: &str,
        method: &str,
        payload: Bytes,
    ) -> RouteRequest {
        RouteRequest::new(source_service, target_service, method, payload)
            .with_timeout(self.request_timeout)
            .with_max_retries(self.max_retries)
    }

    pub fn start(&self, workers: usize) {
        let mut handles = self.workers.lock();
        if handles.iter().any(|h| !h.is_finished()) {
            warn!("Router workers already running");
            return;
        }
        handles.clear();

        let cancel = CancellationToken::new();
        *self.cancel.lock() = cancel.clone();

        for worker_id in 0..workers.max(1) {
            let core = self.core.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                core.run_worker(worker_id, cancel).await;
            }));
        }
        info!(workers = handles.len(), "Started routing workers");
    }

    pub async fn stop(&self) {
        self.cancel.lock().cancel();
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Routing worker terminated abnormally");
            }
        }
        self.core.transport.close().await;
        info!("Router stopped");
    }

    /// Enqueues `request` and waits for its response or its timeout.
    pub async fn route_async(&self, request: RouteRequest) -> RouteResponse {
        let request_id = request.request_id.clone();
        let timeout = request.timeout;

        let completion = match self.core.queue.enqueue(request).await {
            Ok(completion) => completion,
            Err(e) => return RouteResponse::failure(request_id, e.to_string(), 0.0),
        };

        match tokio::time::timeout(timeout, completion).await {
            Ok(Ok(Ok(response))) => response,
            Ok(Ok(Err(e))) => RouteResponse::failure(request_id, e.to_string(), 0.0),
            Ok(Err(_)) => RouteResponse::failure(request_id, RouterError::Dropped.to_string(), 0.0),
            Err(_) => {
                self.core.queue.fail(&request_id, "Request timeout");
                warn!(request_id = %request_id, "Route request timed out");
                RouteResponse::failure(request_id, "Request timeout", timeout.as_secs_f64() * 1000.0)
            }
        }
    }

    /// Routes to the target chosen by the conditional rules of `source_node`.
    /// Returns `None` when no rule matches.
    pub async fn route_conditional(
        &self,
        source_node: &str,
        context: &Value,
        payload: Bytes,
        metadata: HashMap<String, String>,
    ) -> Option<RouteResponse> {
        let target = self.conditional.next_node(source_node, context)?;
        let request = self
            .request(source_node, &target, "Process", payload)
            .with_metadata(metadata)
            .with_strategy(RoutingStrategy::Conditional);
        Some(self.route_async(request).await)
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            pending_requests: self.core.queue.pending_count(),
            in_flight_requests: self.core.queue.in_flight_count(),
            active_workers: self.workers.lock().iter().filter(|h| !h.is_finished()).count(),
            channel_pool_size: self.core.transport.pool_size(),
            instance_count: self.core.balancer.instance_count(),
        }
    }
}

impl RouterCore {
    async fn run_worker(&self, worker_id: usize, cancel: CancellationToken) {
        debug!(worker_id, "Routing worker started");
        loop {
            let request = tokio::select! {
                _ = cancel.cancelled() => break,
                request = self.queue.dequeue(DEQUEUE_TIMEOUT) => request,
            };
            let Some(request) = request else { continue };

            let request_id = request.request_id.clone();
            let response = self.route_request(request).await;
            self.queue.complete(&request_id, response);
        }
        debug!(worker_id, "Routing worker stopped");
    }

    async fn route_request(&self, mut request: RouteRequest) -> RouteResponse {
        let started = Instant::now();

        let instances = match self.registry.get_instances(&request.target_service).await {
            Ok(instances) => instances,
            Err(e) => {
                error!(service = %request.target_service, error = %e, "Failed to resolve service instances");
                Vec::new()
            }
        };
        if instances.is_empty() {
            let mut response = RouteResponse::failure(
                request.request_id.clone(),
                format!("No instances found for service {}", request.target_service),
                0.0,
            );
            response.retry_count = request.retry_count;
            return response;
        }

        let (address, outcome) = loop {
            let Some(instance) = self.balancer.select_instance(&instances, request.routing_strategy) else {
                break (String::new(), Err("No instance selected".to_string()));
            };
            let address = instance.address();

            self.balancer.increment_connections(&address);
            let attempt_started = Instant::now();
            let result = self.transport.forward(&address, &request).await;
            self.balancer.decrement_connections(&address);
            self.balancer
                .update_metrics(&address, elapsed_ms(attempt_started), result.is_ok());

            match result {
                Ok(body) => break (address, Ok(body)),
                Err(e) if request.retry_count < request.max_retries => {
                    request.retry_count += 1;
                    warn!(
                        target_service = %request.target_service,
                        instance = %address,
                        attempt = request.retry_count,
                        error = %e,
                        "Route attempt failed, retrying"
                    );
                }
                Err(e) => break (address, Err(e.to_string())),
            }
        };

        let latency_ms = elapsed_ms(started);
        let success = outcome.is_ok();
        telemetry::record_route(
            &request.target_service,
            request.routing_strategy.as_str(),
            started.elapsed(),
            success,
        );

        if let Some(store) = &self.event_store {
            let event = Event::new(EventType::RouteCalled)
                .with_route(
                    request.source_service.as_str(),
                    request.target_service.as_str(),
                    request.method.as_str(),
                )
                .with_success(success)
                .with_metadata(json!({
                    "instance": address,
                    "latency_ms": latency_ms,
                    "strategy": request.routing_strategy.as_str(),
                    "retry_count": request.retry_count,
                }));
            store.add_event(event).await;
        }

        let (response, error) = match outcome {
            Ok(body) => (Some(body), None),
            Err(e) => (None, Some(e)),
        };
        RouteResponse {
            request_id: request.request_id,
            success,
            response,
            error,
            latency_ms,
            target_instance: Some(address).filter(|a| !a.is_empty()),
            retry_count: request.retry_count,
        }
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}
