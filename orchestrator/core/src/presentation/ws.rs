// Copyright (c) 2026 AOL Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Real-time WebSocket feed
//!
//! Each connection receives an `initial_state` frame, then every stored event
//! as an `event` frame. Clients that send `subscribe_alerts` additionally get
//! `alert` frames for lazy agents, failed workflows and services turning
//! unhealthy.

use crate::domain::events::{Event, EventType};
use crate::domain::service::ServiceStatus;
use crate::infrastructure::event_bus::EventBusError;
use crate::infrastructure::telemetry;
use crate::presentation::api::{all_instances, AppState};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

#[derive(Debug, Deserialize)]
struct ClientMessage {
    #[serde(rename = "type")]
    kind: String,
}

/// Wraps a stored event as a feed frame.
pub fn event_frame(event: &Event) -> Value {
    json!({
        "type": "event",
        "data": event,
        "timestamp": Utc::now(),
    })
}

/// The alert frame for `event`, if it is alert-worthy.
pub fn alert_frame(event: &Event) -> Option<Value> {
    let alerting = match event.event_type {
        EventType::AgentLazyDetected | EventType::WorkflowFailed => true,
        EventType::HealthChanged => event.new_status.as_deref() == Some(ServiceStatus::Unhealthy.as_str()),
        _ => false,
    };
    alerting.then(|| {
        json!({
            "type": "alert",
            "data": {
                "alert_type": event.event_type,
                "service": event.service_name,
                "details": event,
            },
            "timestamp": Utc::now(),
        })
    })
}

pub async fn initial_state(state: &AppState) -> Value {
    let services: Vec<Value> = match all_instances(state).await {
        Ok(instances) => instances
            .iter()
            .map(|i| {
                json!({
                    "name": i.name,
                    "version": i.version,
                    "host": i.host,
                    "grpc_port": i.grpc_port,
                    "status": i.status,
                    "service_id": i.service_id,
                })
            })
            .collect(),
        Err(e) => {
            error!(error = %e, "Failed to list services for initial state");
            Vec::new()
        }
    };

    json!({
        "type": "initial_state",
        "services": services,
        "stats": state.event_store.get_stats().await,
    })
}

async fn send_json(socket: &mut WebSocket, frame: &Value) -> bool {
    socket.send(Message::Text(frame.to_string().into())).await.is_ok()
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let mut events = state.event_store.bus().subscribe_all();
    let mut alerts = false;
    telemetry::record_ws_connected();
    info!(
        subscribers = state.event_store.bus().subscriber_count(),
        "WebSocket client connected"
    );

    if !send_json(&mut socket, &initial_state(&state).await).await {
        warn!("Failed to send initial state");
    }

    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) => {
                    if !send_json(&mut socket, &event_frame(&event)).await {
                        break;
                    }
                    if alerts {
                        if let Some(frame) = alert_frame(&event) {
                            if !send_json(&mut socket, &frame).await {
                                break;
                            }
                        }
                    }
                }
                Err(EventBusError::Lagged(_)) | Err(EventBusError::Empty) => continue,
                Err(EventBusError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let Some(reply) = handle_client_message(text.as_str(), &state, &mut alerts).await else {
                        continue;
                    };
                    if !send_json(&mut socket, &reply).await {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!(error = %e, "WebSocket error");
                    break;
                }
            },
        }
    }

    telemetry::record_ws_disconnected();
    info!("WebSocket client disconnected");
}

async fn handle_client_message(text: &str, state: &AppState, alerts: &mut bool) -> Option<Value> {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            debug!(error = %e, "Ignoring malformed client message");
            return None;
        }
    };

    match message.kind.as_str() {
        "ping" => Some(json!({ "type": "pong" })),
        "subscribe_alerts" => {
            *alerts = true;
            Some(json!({ "type": "subscribed", "channel": "alerts" }))
        }
        "get_stats" => Some(json!({
            "type": "stats",
            "data": state.event_store.get_stats().await,
        })),
        other => {
            debug!(kind = %other, "Ignoring unknown client message");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lazy_detection_raises_alert() {
        let event = Event::new(EventType::AgentLazyDetected).with_service("critic");
        let frame = alert_frame(&event).unwrap();
        assert_eq!(frame["type"], "alert");
        assert_eq!(frame["data"]["alert_type"], "agent_lazy_detected");
        assert_eq!(frame["data"]["service"], "critic");
    }

    #[test]
    fn test_only_unhealthy_transitions_alert() {
        let down = Event::new(EventType::HealthChanged).with_status_change("healthy", "unhealthy");
        let up = Event::new(EventType::HealthChanged).with_status_change("starting", "healthy");
        assert!(alert_frame(&down).is_some());
        assert!(alert_frame(&up).is_none());
    }

    #[test]
    fn test_routine_events_do_not_alert() {
        assert!(alert_frame(&Event::new(EventType::RouteCalled).with_success(false)).is_none());
        assert!(alert_frame(&Event::new(EventType::WorkflowFailed)).is_some());
    }

    #[test]
    fn test_event_frame_embeds_event() {
        let event = Event::new(EventType::ServiceRegistered).with_service("planner");
        let frame = event_frame(&event);
        assert_eq!(frame["type"], "event");
        assert_eq!(frame["data"]["event_type"], "service_registered");
        assert_eq!(frame["data"]["service_name"], "planner");
    }
}
