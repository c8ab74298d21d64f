// Copyright (c) 2026 AOL Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Metrics recording utilities
//!
//! Records core metrics through the `metrics` facade. The Prometheus recorder
//! is installed once by the binary; the rendered exposition is served from
//! `/metrics` by the monitoring API.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Installs the global Prometheus recorder and returns its render handle.
pub fn install_prometheus() -> anyhow::Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {e}"))
}

/// A render handle that is not installed globally, for tests and embedding.
pub fn detached_prometheus() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}

/// Record a routed call
pub fn record_route(target: &str, strategy: &str, latency: Duration, success: bool) {
    let labels = [
        ("target", target.to_string()),
        ("strategy", strategy.to_string()),
        ("status", if success { "ok" } else { "error" }.to_string()),
    ];

    counter!("aol_route_requests_total", &labels).increment(1);
    histogram!("aol_route_latency_seconds", &labels).record(latency.as_secs_f64());
}

/// Record a stored event
pub fn record_event(event_type: &str) {
    let labels = [("type", event_type.to_string())];
    counter!("aol_events_total", &labels).increment(1);
}

/// Record a health probe result
pub fn record_health_check(healthy: bool) {
    let labels = [("status", if healthy { "healthy" } else { "unhealthy" }.to_string())];
    counter!("aol_health_checks_total", &labels).increment(1);
}

/// Record the number of registered instances
pub fn record_registered_services(count: usize) {
    gauge!("aol_registered_services").set(count as f64);
}

/// Record a deliberation restart
pub fn record_restart() {
    counter!("aol_deliberation_restarts_total").increment(1);
}

pub fn record_ws_connected() {
    gauge!("aol_ws_connections").increment(1.0);
}

pub fn record_ws_disconnected() {
    gauge!("aol_ws_connections").decrement(1.0);
}
