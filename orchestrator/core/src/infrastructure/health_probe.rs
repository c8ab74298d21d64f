// Copyright (c) 2026 AOL Contributors
// SPDX-License-Identifier: AGPL-3.0

// HTTP Health Probe
//
// Probes `GET http://{host}:{health_port}/health` with a 5 second timeout.
// HTTP 200 is healthy; a JSON body is attached when the service returns one.

use crate::domain::health::{HealthProbe, ProbeOutcome};
use crate::domain::service::ServiceInstance;
use async_trait::async_trait;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::debug;

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct HttpHealthProbe {
    client: reqwest::Client,
}

impl HttpHealthProbe {
    pub fn new() -> Self {
        Self::with_timeout(PROBE_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    pub fn health_url(instance: &ServiceInstance) -> String {
        format!("http://{}:{}/health", instance.host, instance.health_port)
    }
}

impl Default for HttpHealthProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self, instance: &ServiceInstance) -> ProbeOutcome {
        let url = Self::health_url(instance);
        let started = Instant::now();

        match self.client.get(&url).send().await {
            Ok(response) => {
                let status_code = response.status().as_u16();
                let body = response.json::<Value>().await.ok();
                let response_time_ms = started.elapsed().as_secs_f64() * 1000.0;
                debug!(service = %instance.name, status_code, response_time_ms, "Health probe answered");
                ProbeOutcome::Responded {
                    healthy: status_code == 200,
                    status_code,
                    body,
                    response_time_ms,
                }
            }
            Err(e) => {
                let response_time_ms = started.elapsed().as_secs_f64() * 1000.0;
                debug!(service = %instance.name, error = %e, "Health probe failed");
                ProbeOutcome::Unreachable {
                    error: e.to_string(),
                    response_time_ms,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn instance_at(address: &str) -> ServiceInstance {
        let (host, port) = address.rsplit_once(':').unwrap();
        let port: u16 = port.parse().unwrap();
        ServiceInstance::new(json!({ "metadata": { "name": "probe-me" } }), host, 1, port, 2)
    }

    #[tokio::test]
    async fn test_healthy_response_with_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/health")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"status":"healthy","kind":"AOLAgent"}"#)
            .create_async()
            .await;

        let outcome = HttpHealthProbe::new().probe(&instance_at(&server.host_with_port())).await;
        mock.assert_async().await;
        assert!(outcome.is_healthy());
        assert_eq!(outcome.reported_kind(), Some("AOLAgent"));
    }

    #[tokio::test]
    async fn test_non_200_is_unhealthy() {
        let mut server = mockito::Server::new_async().await;
        server.mock("GET", "/health").with_status(503).create_async().await;

        let outcome = HttpHealthProbe::new().probe(&instance_at(&server.host_with_port())).await;
        assert!(!outcome.is_healthy());
        assert!(matches!(outcome, ProbeOutcome::Responded { status_code: 503, body: None, .. }));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint() {
        let probe = HttpHealthProbe::with_timeout(Duration::from_millis(500));
        // Port 9 (discard) on localhost is almost never listening.
        let outcome = probe.probe(&instance_at("127.0.0.1:9")).await;
        assert!(matches!(outcome, ProbeOutcome::Unreachable { .. }));
    }
}
