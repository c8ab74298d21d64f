// Copyright (c) 2026 AOL Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Routing Domain Model
//!
//! Requests routed between services, per-instance performance metrics used for
//! load balancing, and the declarative [`Condition`] predicates evaluated by
//! conditional routing and conditional workflow edges.
//!
//! # Architecture
//!
//! - **Layer:** Domain
//! - **Purpose:** Value objects for the request router

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    RoundRobin,
    LeastConnections,
    Weighted,
    #[default]
    HealthAware,
    LatencyBased,
    Conditional,
}

impl RoutingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingStrategy::RoundRobin => "round_robin",
            RoutingStrategy::LeastConnections => "least_connections",
            RoutingStrategy::Weighted => "weighted",
            RoutingStrategy::HealthAware => "health_aware",
            RoutingStrategy::LatencyBased => "latency_based",
            RoutingStrategy::Conditional => "conditional",
        }
    }
}

impl fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoutingStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round_robin" => Ok(RoutingStrategy::RoundRobin),
            "least_connections" => Ok(RoutingStrategy::LeastConnections),
            "weighted" => Ok(RoutingStrategy::Weighted),
            "health_aware" => Ok(RoutingStrategy::HealthAware),
            "latency_based" => Ok(RoutingStrategy::LatencyBased),
            "conditional" => Ok(RoutingStrategy::Conditional),
            other => Err(format!("unknown routing strategy '{other}'")),
        }
    }
}

/// A call to be forwarded to an instance of `target_service`
#[derive(Debug, Clone)]
pub struct RouteRequest {
    pub request_id: String,
    pub source_service: String,
    pub target_service: String,
    pub method: String,
    pub payload: Bytes,
    pub metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub timeout: Duration,
    pub retry_count: u32,
    pub max_retries: u32,
    pub routing_strategy: RoutingStrategy,
}

impl RouteRequest {
    pub fn new(
        source_service: impl Into<String>,
        target_service: impl Into<String>,
        method: impl Into<String>,
        payload: Bytes,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            source_service: source_service.into(),
            target_service: target_service.into(),
            method: method.into(),
            payload,
            metadata: HashMap::new(),
            created_at: Utc::now(),
            timeout: Duration::from_secs(30),
            retry_count: 0,
            max_retries: 3,
            routing_strategy: RoutingStrategy::HealthAware,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_strategy(mut self, strategy: RoutingStrategy) -> Self {
        self.routing_strategy = strategy;
        self
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// Outcome of a routed call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteResponse {
    pub request_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "opt_bytes")]
    pub response: Option<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub latency_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_instance: Option<String>,
    pub retry_count: u32,
}

impl RouteResponse {
    pub fn failure(request_id: impl Into<String>, error: impl Into<String>, latency_ms: f64) -> Self {
        Self {
            request_id: request_id.into(),
            success: false,
            response: None,
            error: Some(error.into()),
            latency_ms,
            target_instance: None,
            retry_count: 0,
        }
    }
}

/// Response bodies travel as UTF-8 text when possible, as a byte array otherwise.
mod opt_bytes {
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Text(String),
        Raw(Vec<u8>),
    }

    pub fn serialize<S: Serializer>(value: &Option<Bytes>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => match std::str::from_utf8(bytes) {
                Ok(text) => Repr::Text(text.to_string()).serialize(serializer),
                Err(_) => Repr::Raw(bytes.to_vec()).serialize(serializer),
            },
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Bytes>, D::Error> {
        Ok(Option::<Repr>::deserialize(deserializer)?.map(|repr| match repr {
            Repr::Text(text) => Bytes::from(text),
            Repr::Raw(raw) => Bytes::from(raw),
        }))
    }
}

// ============================================================================
// Transport
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to connect to {address}: {message}")]
    Connect { address: String, message: String },

    #[error("Invalid method path '{0}'")]
    InvalidPath(String),

    #[error("Call failed: {0}")]
    Call(String),
}

/// Moves a request's payload to a concrete instance and returns the reply
#[async_trait]
pub trait RouteTransport: Send + Sync {
    async fn forward(&self, address: &str, request: &RouteRequest) -> Result<Bytes, TransportError>;

    /// Number of pooled connections
    fn pool_size(&self) -> usize;

    async fn close(&self);
}

// ============================================================================
// Instance Metrics
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub total_latency_ms: f64,
    pub active_connections: u64,
    pub health_score: f64,
    pub last_updated: DateTime<Utc>,
}

impl Default for InstanceMetrics {
    fn default() -> Self {
        Self {
            total_requests: 0,
            successful_requests: 0,
            total_latency_ms: 0.0,
            active_connections: 0,
            health_score: 1.0,
            last_updated: Utc::now(),
        }
    }
}

impl InstanceMetrics {
    pub fn avg_latency_ms(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.total_latency_ms / self.total_requests as f64
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 1.0;
        }
        self.successful_requests as f64 / self.total_requests as f64
    }

    /// Records one call and recomputes the health score:
    /// `0.7 · success_rate + 0.3 · 1 / (1 + avg_latency_ms / 1000)`.
    pub fn record(&mut self, latency_ms: f64, success: bool) {
        self.total_requests += 1;
        self.total_latency_ms += latency_ms;
        if success {
            self.successful_requests += 1;
        }
        let latency_factor = 1.0 / (1.0 + self.avg_latency_ms() / 1000.0);
        self.health_score = self.success_rate() * 0.7 + latency_factor * 0.3;
        self.last_updated = Utc::now();
    }
}

// ============================================================================
// Conditions
// ============================================================================

/// Predicate over a JSON routing context. Paths are JSON pointers
/// (`/current_output/score`); a missing path never matches.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    Always,
    Exists { path: String },
    Equals { path: String, value: Value },
    Truthy { path: String },
    GreaterThan { path: String, value: f64 },
    LessThan { path: String, value: f64 },
    Not { condition: Box<Condition> },
    All { conditions: Vec<Condition> },
    Any { conditions: Vec<Condition> },
    #[serde(skip)]
    Custom(Arc<dyn Fn(&Value) -> bool + Send + Sync>),
}

impl Condition {
    pub fn custom(f: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        Condition::Custom(Arc::new(f))
    }

    pub fn equals(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::Equals {
            path: path.into(),
            value: value.into(),
        }
    }

    pub fn evaluate(&self, context: &Value) -> bool {
        match self {
            Condition::Always => true,
            Condition::Exists { path } => context.pointer(path).is_some(),
            Condition::Equals { path, value } => context.pointer(path) == Some(value),
            Condition::Truthy { path } => context.pointer(path).is_some_and(is_truthy),
            Condition::GreaterThan { path, value } => context
                .pointer(path)
                .and_then(Value::as_f64)
                .is_some_and(|v| v > *value),
            Condition::LessThan { path, value } => context
                .pointer(path)
                .and_then(Value::as_f64)
                .is_some_and(|v| v < *value),
            Condition::Not { condition } => !condition.evaluate(context),
            Condition::All { conditions } => conditions.iter().all(|c| c.evaluate(context)),
            Condition::Any { conditions } => conditions.iter().any(|c| c.evaluate(context)),
            Condition::Custom(f) => f(context),
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Custom(_) => f.write_str("Custom(..)"),
            other => match serde_json::to_string(other) {
                Ok(json) => f.write_str(&json),
                Err(_) => f.write_str("Condition"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_health_score_formula() {
        let mut metrics = InstanceMetrics::default();
        metrics.record(1000.0, true);
        // success 1.0, latency factor 0.5
        assert!((metrics.health_score - 0.85).abs() < 1e-9);
        metrics.record(1000.0, false);
        assert!((metrics.health_score - (0.35 + 0.15)).abs() < 1e-9);
    }

    #[test]
    fn test_conditions_over_context() {
        let ctx = json!({ "current_output": { "intent": "search", "score": 0.8, "tags": [] } });
        assert!(Condition::equals("/current_output/intent", "search").evaluate(&ctx));
        assert!(Condition::GreaterThan { path: "/current_output/score".into(), value: 0.5 }.evaluate(&ctx));
        assert!(!Condition::Truthy { path: "/current_output/tags".into() }.evaluate(&ctx));
        assert!(!Condition::Exists { path: "/missing".into() }.evaluate(&ctx));
        let any = Condition::Any {
            conditions: vec![
                Condition::Exists { path: "/missing".into() },
                Condition::custom(|c| c.get("current_output").is_some()),
            ],
        };
        assert!(any.evaluate(&ctx));
    }

    #[test]
    fn test_condition_wire_format() {
        let condition: Condition =
            serde_json::from_value(json!({ "type": "equals", "path": "/a", "value": 1 })).unwrap();
        assert!(condition.evaluate(&json!({ "a": 1 })));
        let not: Condition = serde_json::from_value(
            json!({ "type": "not", "condition": { "type": "always" } }),
        )
        .unwrap();
        assert!(!not.evaluate(&json!({})));
    }

    #[test]
    fn test_route_response_text_body() {
        let response = RouteResponse {
            request_id: "r".into(),
            success: true,
            response: Some(Bytes::from_static(b"{\"ok\":true}")),
            error: None,
            latency_ms: 1.0,
            target_instance: Some("h:1".into()),
            retry_count: 0,
        };
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["response"], "{\"ok\":true}");
    }
}
