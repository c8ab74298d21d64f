// Copyright (c) 2026 AOL Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Consul HTTP client against a mock agent.

use aol_core::infrastructure::consul::{ConsulClient, ConsulError, ConsulRegistration};
use mockito::Matcher;
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const HEALTH_RESPONSE: &str = r#"[
  {
    "Node": { "Node": "node-1" },
    "Service": {
      "ID": "planner-1",
      "Service": "planner",
      "Address": "10.0.3.4",
      "Port": 50051,
      "Tags": ["aol", "agent"],
      "Meta": { "health_port": "50052", "metrics_port": "9090" }
    },
    "Checks": []
  }
]"#;

#[tokio::test]
async fn test_register_service_sends_consul_payload() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("PUT", "/v1/agent/service/register")
        .match_body(Matcher::PartialJson(json!({
            "ID": "planner-1",
            "Name": "planner",
            "Address": "10.0.3.4",
            "Port": 50051,
            "Tags": ["agent"],
            "Meta": { "health_port": "50052" },
            "Check": {
                "HTTP": "http://10.0.3.4:50052/health",
                "Interval": "10s",
                "Timeout": "5s",
                "DeregisterCriticalServiceAfter": "30s"
            }
        })))
        .with_status(200)
        .create_async()
        .await;

    let client = ConsulClient::with_base_url(server.url());
    let registration = ConsulRegistration::new("planner-1", "planner", "10.0.3.4", 50051, 50052)
        .with_tags(vec!["agent".to_string()]);
    client.register_service(&registration).await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn test_deregister_and_error_status() {
    let mut server = mockito::Server::new_async().await;
    let ok = server
        .mock("PUT", "/v1/agent/service/deregister/planner-1")
        .with_status(200)
        .create_async()
        .await;
    server
        .mock("PUT", "/v1/agent/service/deregister/ghost")
        .with_status(404)
        .with_body("Unknown service ID \"ghost\"")
        .create_async()
        .await;

    let client = ConsulClient::with_base_url(server.url());
    client.deregister_service("planner-1").await.unwrap();
    ok.assert_async().await;

    let err = client.deregister_service("ghost").await.unwrap_err();
    match err {
        ConsulError::Status { status, body } => {
            assert_eq!(status, 404);
            assert!(body.contains("ghost"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_discover_service_passing_only() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/v1/health/service/planner")
        .match_query(Matcher::UrlEncoded("passing".into(), "true".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(HEALTH_RESPONSE)
        .create_async()
        .await;

    let client = ConsulClient::with_base_url(server.url());
    let instances = client.discover_service("planner", true).await.unwrap();
    mock.assert_async().await;

    assert_eq!(instances.len(), 1);
    let planner = &instances[0];
    assert_eq!(planner.id, "planner-1");
    assert_eq!(planner.name, "planner");
    assert_eq!(planner.address, "10.0.3.4");
    assert_eq!(planner.port, 50051);
    assert_eq!(planner.health_port, 50052);
    assert_eq!(planner.metrics_port, 9090);
    assert_eq!(planner.tags, vec!["aol", "agent"]);
}

#[tokio::test]
async fn test_list_services_from_catalog() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/v1/catalog/services")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"consul":[],"planner":["aol","agent"]}"#)
        .create_async()
        .await;

    let services = ConsulClient::with_base_url(server.url()).list_services().await.unwrap();
    assert_eq!(services.len(), 2);
    assert_eq!(services["planner"], vec!["aol", "agent"]);
}

#[tokio::test]
async fn test_kv_get_and_set() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/v1/kv/aol/router")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"[{"Key":"aol/router","Flags":0,"Value":"d29ya2VyczogOA=="}]"#)
        .create_async()
        .await;
    server
        .mock("GET", "/v1/kv/aol/missing")
        .with_status(404)
        .create_async()
        .await;
    let put = server
        .mock("PUT", "/v1/kv/aol/router")
        .match_body("workers: 4")
        .with_status(200)
        .with_body("true")
        .create_async()
        .await;

    let client = ConsulClient::with_base_url(server.url());
    assert_eq!(
        client.get_config("aol/router").await.unwrap().as_deref(),
        Some("workers: 8")
    );
    assert_eq!(client.get_config("aol/missing").await.unwrap(), None);
    assert!(client.set_config("aol/router", "workers: 4").await.unwrap());
    put.assert_async().await;
}

#[tokio::test]
async fn test_watch_service_delivers_instances_until_cancelled() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/v1/health/service/planner")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_header("X-Consul-Index", "42")
        .with_body(HEALTH_RESPONSE)
        .create_async()
        .await;

    let client = ConsulClient::with_base_url(server.url());
    let (tx, mut rx) = mpsc::channel(4);
    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move { client.watch_service("planner", tx, cancel).await })
    };

    let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("watch produced nothing")
        .unwrap();
    assert_eq!(first[0].id, "planner-1");

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), watcher)
        .await
        .expect("watch did not stop")
        .unwrap();
}
