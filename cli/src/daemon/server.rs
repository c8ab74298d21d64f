// Copyright (c) 2026 AOL Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Core server implementation

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use aol_core::{
    application::{
        analysis::AnalysisService,
        event_store::EventStore,
        health_manager::HealthManager,
        registration::RegistrationService,
        router::Router,
        workflow_executor::{RouterInvoker, ServiceInvoker, WorkflowExecutor},
    },
    domain::{config::AolConfig, registry::ServiceRegistry},
    infrastructure::{
        consul::{ConsulClient, ConsulRegistration},
        event_bus::EventBus,
        grpc_transport::GrpcTransport,
        health_probe::HttpHealthProbe,
        registry::InMemoryServiceRegistry,
        telemetry,
    },
    presentation::api::{self, AppState},
};

/// Fully wired core services, not yet started.
pub struct CoreRuntime {
    pub state: AppState,
    pub router: Arc<Router>,
    pub health_manager: Arc<HealthManager>,
}

pub fn build_runtime(config: &AolConfig, metrics: PrometheusHandle) -> CoreRuntime {
    let spec = &config.spec;

    let event_store = Arc::new(EventStore::new(
        spec.event_store.max_events,
        EventBus::with_default_capacity(),
    ));
    let registry: Arc<dyn ServiceRegistry> = Arc::new(InMemoryServiceRegistry::new());

    let router = Arc::new(Router::new(
        &spec.router,
        registry.clone(),
        Arc::new(GrpcTransport::new()),
        Some(event_store.clone()),
    ));

    let health_manager = Arc::new(HealthManager::new(
        &spec.registry,
        &spec.health_management,
        registry.clone(),
        event_store.clone(),
        Arc::new(HttpHealthProbe::new()),
    ));

    let invoker: Arc<dyn ServiceInvoker> = Arc::new(RouterInvoker::new(router.clone()));
    let executor = Arc::new(WorkflowExecutor::new(Some(invoker), Some(event_store.clone())));

    let consul = spec
        .consul
        .enabled
        .then(|| ConsulClient::from_config(&spec.consul));

    let state = AppState {
        registration: Arc::new(RegistrationService::new(registry.clone(), event_store.clone())),
        analysis: Arc::new(AnalysisService::new(event_store.clone(), registry)),
        event_store,
        router: router.clone(),
        health_manager: health_manager.clone(),
        executor,
        consul,
        metrics,
    };

    CoreRuntime {
        state,
        router,
        health_manager,
    }
}

fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

fn self_registration_id() -> String {
    format!("aol-core-{}", local_hostname())
}

/// Address other services reach the core on. A wildcard bind is advertised
/// under the machine's hostname.
pub fn advertised_host(bind_host: &str) -> String {
    match bind_host {
        "0.0.0.0" | "::" | "" => local_hostname(),
        host => host.to_string(),
    }
}

async fn bind(addr: &str, surface: &str) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {surface} to {addr}"))?;
    info!(address = %addr, "{} listening", surface);
    Ok(listener)
}

pub async fn start_server(config: AolConfig) -> Result<()> {
    config.validate().context("Configuration validation failed")?;
    info!(name = %config.metadata.name, "AOL core starting");

    let metrics = if config.spec.monitoring.metrics_enabled {
        telemetry::install_prometheus()?
    } else {
        telemetry::detached_prometheus()
    };

    let runtime = build_runtime(&config, metrics);
    let spec = &config.spec;

    let gateway_listener = bind(&config.gateway_bind_address(), "Gateway API").await?;
    let monitoring_listener = bind(&config.health_bind_address(), "Monitoring API").await?;

    // Consul self-registration, advertising the gateway that is now bound
    let registration_id = self_registration_id();
    if let Some(consul) = &runtime.state.consul {
        let registration = ConsulRegistration::new(
            &registration_id,
            "aol-core",
            advertised_host(&spec.gateway.host),
            spec.gateway.port,
            spec.monitoring.health_port,
        )
        .with_tags(vec!["aol".to_string(), "core".to_string()]);
        match consul.register_service(&registration).await {
            Ok(()) => info!(service_id = %registration_id, "Registered with Consul"),
            Err(e) => warn!(error = %e, "Consul self-registration failed; continuing without it"),
        }
    }

    runtime.router.start(spec.router.workers);

    let cancel = CancellationToken::new();
    let health_loop: JoinHandle<()> = {
        let manager = runtime.health_manager.clone();
        let token = cancel.clone();
        tokio::spawn(async move { manager.run_health_checks(token).await })
    };

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.cancel();
    });

    let gateway = axum::serve(gateway_listener, api::gateway_app(runtime.state.clone()))
        .with_graceful_shutdown(cancel.clone().cancelled_owned());
    let monitoring = axum::serve(monitoring_listener, api::app(runtime.state.clone()))
        .with_graceful_shutdown(cancel.clone().cancelled_owned());

    let (gateway, monitoring) = tokio::join!(
        async {
            let result = gateway.await;
            cancel.cancel();
            result
        },
        async {
            let result = monitoring.await;
            cancel.cancel();
            result
        }
    );
    let served = gateway
        .context("Gateway server failed")
        .and(monitoring.context("Monitoring server failed"));

    info!("AOL core shutting down");
    if let Err(e) = health_loop.await {
        error!(error = %e, "Health loop terminated abnormally");
    }
    runtime.router.stop().await;

    if let Some(consul) = &runtime.state.consul {
        if let Err(e) = consul.deregister_service(&registration_id).await {
            warn!(error = %e, "Consul deregistration failed");
        }
    }

    served
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
