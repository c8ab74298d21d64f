// Copyright (c) 2026 AOL Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Monitoring REST API
//!
//! JSON endpoints consumed by the dashboard and the `aol` CLI. Handlers only
//! translate between HTTP and the application services; every error is
//! rendered as `{"error": message}`.

use crate::application::analysis::AnalysisService;
use crate::application::event_store::{EventFilter, EventStore};
use crate::application::health_manager::HealthManager;
use crate::application::registration::{RegisterRequest, RegistrationService};
use crate::application::router::Router as RequestRouter;
use crate::application::workflow_executor::{WorkflowExecutor, DEFAULT_EXECUTION_TIMEOUT};
use crate::domain::events::EventType;
use crate::domain::registry::{RegistryError, ServiceRegistry};
use crate::domain::routing::RoutingStrategy;
use crate::domain::service::{ServiceId, ServiceInstance, ServiceStatus, ServiceView};
use crate::domain::workflow::WorkflowDefinition;
use crate::infrastructure::consul::{ConsulClient, ConsulError};
use crate::presentation::ws;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use bytes::Bytes;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

const DEFAULT_LIMIT: usize = 100;
const TIMELINE_LIMIT: usize = 1000;

// ============================================================================
// State and errors
// ============================================================================

#[derive(Clone)]
pub struct AppState {
    pub registration: Arc<RegistrationService>,
    pub event_store: Arc<EventStore>,
    pub router: Arc<RequestRouter>,
    pub health_manager: Arc<HealthManager>,
    pub executor: Arc<WorkflowExecutor>,
    pub analysis: Arc<AnalysisService>,
    pub consul: Option<ConsulClient>,
    pub metrics: PrometheusHandle,
}

impl AppState {
    pub fn registry(&self) -> &Arc<dyn ServiceRegistry> {
        self.registration.registry()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Upstream(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = %status, "API request failed: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::NotFound(_) => ApiError::NotFound(e.to_string()),
            RegistryError::InvalidManifest(_) => ApiError::BadRequest(e.to_string()),
            RegistryError::PortConflict { .. } => ApiError::Conflict(e.to_string()),
            RegistryError::Backend(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<ConsulError> for ApiError {
    fn from(e: ConsulError) -> Self {
        ApiError::Upstream(e.to_string())
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// Router
// ============================================================================

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_text))
        .route("/ws", get(ws::ws_handler))
        .route("/api/services", get(list_services).post(register_service))
        .route("/api/services/{name}", get(get_service))
        .route("/api/services/{name}/health", post(report_health))
        .route("/api/services/{name}/{id}", delete(deregister_service))
        .route("/api/registry/stats", get(registry_stats))
        .route("/api/events", get(list_events))
        .route("/api/routes", get(list_routes))
        .route("/api/route", post(route_call))
        .route("/api/router/stats", get(router_stats))
        .route("/api/agents", get(list_agents))
        .route("/api/agents/lazy", get(lazy_agents))
        .route("/api/agents/{id}/report", get(agent_report))
        .route("/api/agents/{id}/health", get(agent_health))
        .route("/api/workflows", get(list_workflows))
        .route("/api/workflows/run", post(run_workflow))
        .route("/api/workflows/{id}/report", get(workflow_report))
        .route("/api/workflows/{id}/timeline", get(workflow_timeline))
        .route("/api/workflows/{id}/health", get(workflow_health))
        .route("/api/analysis/failures", get(failure_analysis))
        .route("/api/analysis/insights", get(insights))
        .route("/api/health/stats", get(health_stats))
        .route("/api/discovery", get(discovery_list))
        .route("/api/discovery/{service}", get(discovery_service))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Service-facing surface served on the gateway port: registration, health
/// reports and routed calls.
pub fn gateway_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/services", get(list_services).post(register_service))
        .route("/api/services/{name}", get(get_service))
        .route("/api/services/{name}/health", post(report_health))
        .route("/api/services/{name}/{id}", delete(deregister_service))
        .route("/api/route", post(route_call))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub(crate) async fn all_instances(state: &AppState) -> ApiResult<Vec<ServiceInstance>> {
    Ok(state.registry().list_services().await?.into_values().flatten().collect())
}

fn performance_summary(state: &AppState, instance: &ServiceInstance) -> Value {
    let report = state.event_store.get_agent_report(&instance.name);
    json!({
        "total_contributions": report.total_contributions,
        "success_rate": report.success_rate,
        "avg_influence": report.average_influence_per_contribution,
        "lazy_flags": report.lazy_flags,
    })
}

// ============================================================================
// Health and metrics
// ============================================================================

async fn health(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let services: Vec<String> = state.registry().list_services().await?.into_keys().collect();
    Ok(Json(json!({ "status": "healthy", "services": services })))
}

async fn metrics_text(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

// ============================================================================
// Services
// ============================================================================

async fn list_services(State(state): State<AppState>) -> ApiResult<Json<Vec<ServiceView>>> {
    let views = all_instances(&state)
        .await?
        .iter()
        .map(|instance| ServiceView {
            performance: Some(performance_summary(&state, instance)),
            ..ServiceView::from(instance)
        })
        .collect();
    Ok(Json(views))
}

async fn get_service(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult<Json<Value>> {
    let instances = state.registry().get_instances(&name).await?;
    if instances.is_empty() {
        return Err(ApiError::NotFound("Service not found".to_string()));
    }

    let mut views: Vec<Value> = Vec::with_capacity(instances.len());
    for instance in &instances {
        let view = ServiceView {
            performance: Some(json!(state.event_store.get_agent_report(&instance.name))),
            ..ServiceView::from(instance)
        };
        views.push(serde_json::to_value(view).map_err(|e| ApiError::Internal(e.to_string()))?);
    }

    if views.len() == 1 {
        Ok(Json(views.remove(0)))
    } else {
        Ok(Json(Value::Array(views)))
    }
}

async fn register_service(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let instance = state.registration.register(request).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "service_id": instance.service_id,
            "service": ServiceView::from(&instance),
        })),
    ))
}

async fn deregister_service(
    State(state): State<AppState>,
    Path((name, id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let service_id: ServiceId = id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid service id '{id}'")))?;
    if !state.registration.deregister(&name, service_id).await? {
        return Err(ApiError::NotFound(format!("Service instance {name}/{id} not found")));
    }
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
struct HealthReportBody {
    status: String,
    #[serde(default)]
    service_id: Option<String>,
}

async fn report_health(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<HealthReportBody>,
) -> ApiResult<Json<Value>> {
    let status: ServiceStatus = body.status.parse().map_err(ApiError::BadRequest)?;
    let service_id = body
        .service_id
        .as_deref()
        .map(str::parse::<ServiceId>)
        .transpose()
        .map_err(|_| ApiError::BadRequest("Invalid service id".to_string()))?;

    let updated = state.registration.report_health(&name, service_id, status).await?;
    Ok(Json(json!({ "received": true, "updated": updated })))
}

async fn registry_stats(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let services = state.registry().list_services().await?;
    let events = state.event_store.get_stats().await;

    let mut by_status: BTreeMap<&str, usize> = BTreeMap::new();
    let mut by_type: BTreeMap<String, usize> = BTreeMap::new();
    let mut healthy = 0usize;
    let mut unhealthy = 0usize;
    for instance in services.values().flatten() {
        *by_status.entry(instance.status.as_str()).or_insert(0) += 1;
        *by_type.entry(instance.service_type().to_string()).or_insert(0) += 1;
        if instance.is_healthy() {
            healthy += 1;
        } else {
            unhealthy += 1;
        }
    }

    Ok(Json(json!({
        "total_services": healthy + unhealthy,
        "unique_services": services.len(),
        "by_status": by_status,
        "by_type": by_type,
        "system_health": {
            "healthy_services": healthy,
            "unhealthy_services": unhealthy,
            "lazy_agents": events.lazy_agent_flags,
            "active_workflows": events.active_workflows,
            "completed_workflows": events.completed_workflows,
            "failed_workflows": events.failed_workflows,
            "health_score": healthy as f64 / (healthy + unhealthy).max(1) as f64,
        },
        "events": events,
    })))
}

// ============================================================================
// Events and routes
// ============================================================================

#[derive(Debug, Deserialize)]
struct EventsQuery {
    #[serde(rename = "type")]
    event_type: Option<String>,
    service: Option<String>,
    workflow: Option<String>,
    limit: Option<usize>,
}

async fn list_events(State(state): State<AppState>, Query(query): Query<EventsQuery>) -> Json<Value> {
    let filter = EventFilter {
        event_type: query.event_type.as_deref().and_then(|t| t.parse::<EventType>().ok()),
        service_name: query.service,
        workflow_id: query.workflow,
    };
    let events = state
        .event_store
        .get_events(&filter, query.limit.unwrap_or(DEFAULT_LIMIT))
        .await;
    Json(json!(events))
}

#[derive(Debug, Deserialize)]
struct RoutesQuery {
    source: Option<String>,
    target: Option<String>,
    limit: Option<usize>,
}

#[derive(Debug, Default, Serialize)]
struct RouteSummary {
    source: String,
    target: String,
    count: usize,
    success_count: usize,
    failure_count: usize,
    methods: BTreeSet<String>,
    total_latency_ms: f64,
    avg_latency_ms: f64,
    success_rate: f64,
}

async fn list_routes(State(state): State<AppState>, Query(query): Query<RoutesQuery>) -> Json<Vec<RouteSummary>> {
    let events = state
        .event_store
        .get_route_events(
            query.source.as_deref(),
            query.target.as_deref(),
            query.limit.unwrap_or(DEFAULT_LIMIT),
        )
        .await;

    let mut routes: BTreeMap<String, RouteSummary> = BTreeMap::new();
    for event in &events {
        let source = event.source_service.clone().unwrap_or_default();
        let target = event.target_service.clone().unwrap_or_default();
        let summary = routes
            .entry(format!("{source}->{target}"))
            .or_insert_with(|| RouteSummary {
                source,
                target,
                ..Default::default()
            });

        summary.count += 1;
        if event.success == Some(true) {
            summary.success_count += 1;
        } else {
            summary.failure_count += 1;
        }
        if let Some(method) = &event.method {
            summary.methods.insert(method.clone());
        }
        if let Some(latency) = event.metadata_field("latency_ms").and_then(Value::as_f64) {
            summary.total_latency_ms += latency;
        }
    }

    let summaries = routes
        .into_values()
        .map(|mut s| {
            let count = s.count.max(1) as f64;
            s.avg_latency_ms = s.total_latency_ms / count;
            s.success_rate = s.success_count as f64 / count;
            s
        })
        .collect();
    Json(summaries)
}

#[derive(Debug, Deserialize)]
struct RouteCallBody {
    #[serde(default = "default_route_source")]
    source_service: String,
    target_service: String,
    method: String,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    metadata: HashMap<String, String>,
    #[serde(default)]
    strategy: Option<RoutingStrategy>,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

fn default_route_source() -> String {
    "api".to_string()
}

async fn route_call(State(state): State<AppState>, Json(body): Json<RouteCallBody>) -> ApiResult<Json<Value>> {
    let payload = match body.payload {
        Value::Null => Bytes::new(),
        Value::String(text) => Bytes::from(text),
        other => Bytes::from(serde_json::to_vec(&other).map_err(|e| ApiError::BadRequest(e.to_string()))?),
    };

    let mut request = state
        .router
        .request(&body.source_service, &body.target_service, &body.method, payload)
        .with_metadata(body.metadata);
    if let Some(strategy) = body.strategy {
        request = request.with_strategy(strategy);
    }
    if let Some(timeout_ms) = body.timeout_ms {
        request = request.with_timeout(Duration::from_millis(timeout_ms));
    }

    let response = state.router.route_async(request).await;
    Ok(Json(json!(response)))
}

async fn router_stats(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.router.stats()))
}

// ============================================================================
// Agents
// ============================================================================

async fn list_agents(State(state): State<AppState>) -> ApiResult<Json<Vec<Value>>> {
    let agents = all_instances(&state)
        .await?
        .iter()
        .map(|instance| {
            let mut entry = match json!(state.event_store.get_agent_report(&instance.name)) {
                Value::Object(map) => map,
                _ => Map::new(),
            };
            entry.insert("agent_id".into(), json!(instance.name));
            entry.insert("service_id".into(), json!(instance.service_id));
            entry.insert("name".into(), json!(instance.name));
            entry.insert("status".into(), json!(instance.status));
            entry.insert("type".into(), json!(instance.kind()));
            Value::Object(entry)
        })
        .collect();
    Ok(Json(agents))
}

#[derive(Debug, Deserialize)]
struct LazyQuery {
    threshold: Option<f64>,
}

/// Agents with lazy flags, plus contributing agents whose average influence
/// is below `threshold`.
async fn lazy_agents(State(state): State<AppState>, Query(query): Query<LazyQuery>) -> ApiResult<Json<Vec<Value>>> {
    let threshold = query.threshold.unwrap_or(0.1);
    let lazy = all_instances(&state)
        .await?
        .iter()
        .filter_map(|instance| {
            let report = state.event_store.get_agent_report(&instance.name);
            let below = report.total_contributions > 0
                && report.average_influence_per_contribution < threshold;
            (report.lazy_flags > 0 || below).then(|| {
                json!({
                    "agent_id": instance.name,
                    "service_id": instance.service_id,
                    "name": instance.name,
                    "lazy_flags": report.lazy_flags,
                    "avg_influence": report.average_influence_per_contribution,
                    "success_rate": report.success_rate,
                })
            })
        })
        .collect();
    Ok(Json(lazy))
}

async fn agent_report(State(state): State<AppState>, Path(id): Path<String>) -> Json<Value> {
    Json(json!(state.event_store.get_agent_report(&id)))
}

async fn agent_health(State(state): State<AppState>, Path(id): Path<String>) -> Json<Value> {
    Json(json!(state.health_manager.agent_health_report(&id)))
}

// ============================================================================
// Workflows
// ============================================================================

async fn list_workflows(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.event_store.list_workflow_reports()))
}

#[derive(Debug, Deserialize)]
struct RunWorkflowBody {
    workflow: WorkflowDefinition,
    #[serde(default)]
    input: Value,
    #[serde(default)]
    timeout_seconds: Option<u64>,
}

async fn run_workflow(State(state): State<AppState>, Json(body): Json<RunWorkflowBody>) -> Json<Value> {
    let graph = body.workflow.into_graph();
    let timeout = body
        .timeout_seconds
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_EXECUTION_TIMEOUT);

    state.health_manager.register_workflow(&graph.workflow_id, graph.agents());
    let outcome = state.executor.execute(&graph, body.input, timeout).await;
    state.health_manager.unregister_workflow(&graph.workflow_id);
    Json(json!({ "workflow_id": graph.workflow_id, "outcome": outcome }))
}

async fn workflow_report(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    state
        .event_store
        .get_workflow_report(&id)
        .map(|report| Json(json!(report)))
        .ok_or_else(|| ApiError::NotFound(format!("Workflow {id} not found")))
}

async fn workflow_timeline(State(state): State<AppState>, Path(id): Path<String>) -> Json<Value> {
    let filter = EventFilter {
        workflow_id: Some(id.clone()),
        ..Default::default()
    };
    let mut events = state.event_store.get_events(&filter, TIMELINE_LIMIT).await;
    events.sort_by_key(|e| e.timestamp);

    let timeline: Vec<Value> = events
        .iter()
        .map(|e| {
            json!({
                "timestamp": e.timestamp,
                "event_type": e.event_type,
                "agent": e.service_name,
                "success": e.success,
                "contribution_score": e.contribution_score,
                "metadata": e.metadata,
            })
        })
        .collect();

    Json(json!({
        "workflow_id": id,
        "total_events": timeline.len(),
        "timeline": timeline,
    }))
}

/// Live health for tracked workflows; finished runs answer from the event store.
async fn workflow_health(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    if let Some(health) = state.health_manager.workflow_health_report(&id) {
        return Ok(Json(json!(health)));
    }
    state
        .event_store
        .get_workflow_report(&id)
        .map(|report| Json(json!(report)))
        .ok_or_else(|| ApiError::NotFound(format!("Workflow {id} is not tracked")))
}

// ============================================================================
// Analysis
// ============================================================================

#[derive(Debug, Deserialize)]
struct HoursQuery {
    hours: Option<i64>,
}

async fn failure_analysis(State(state): State<AppState>, Query(query): Query<HoursQuery>) -> Json<Value> {
    Json(json!(state.analysis.failure_analysis(query.hours.unwrap_or(24)).await))
}

async fn insights(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    Ok(Json(json!(state.analysis.insights().await?)))
}

async fn health_stats(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.health_manager.overall_health_stats()))
}

// ============================================================================
// Discovery
// ============================================================================

fn consul(state: &AppState) -> ApiResult<&ConsulClient> {
    state
        .consul
        .as_ref()
        .ok_or_else(|| ApiError::Unavailable("Consul integration is disabled".to_string()))
}

async fn discovery_list(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let services = consul(&state)?.list_services().await?;
    Ok(Json(json!(services)))
}

#[derive(Debug, Deserialize)]
struct DiscoveryQuery {
    healthy_only: Option<bool>,
}

async fn discovery_service(
    State(state): State<AppState>,
    Path(service): Path<String>,
    Query(query): Query<DiscoveryQuery>,
) -> ApiResult<Json<Value>> {
    let instances = consul(&state)?
        .discover_service(&service, query.healthy_only.unwrap_or(true))
        .await?;
    Ok(Json(json!(instances)))
}
