// Copyright (c) 2026 AOL Contributors
// SPDX-License-Identifier: AGPL-3.0

// Core Configuration Types
//
// Defines the configuration schema for an aol-core node:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Gateway, monitoring and registry settings
// - Consul discovery
// - Health management (lazy detection, deliberation restarts)
// - Event store and router sizing

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_VERSION: &str = "v1";
pub const KIND: &str = "AOLCore";

/// Top-level Kubernetes-style core configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AolConfig {
    /// API version (must be "v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "AOLCore")
    pub kind: String,

    pub metadata: ConfigMetadata,

    #[serde(default)]
    pub spec: CoreSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

/// Configuration body (content under `spec:`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreSpec {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub consul: ConsulConfig,
    #[serde(default)]
    pub health_management: HealthManagementConfig,
    #[serde(default)]
    pub event_store: EventStoreConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Service-facing listener (registration, health reports, routed calls)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    #[serde(default = "default_bind_address")]
    pub host: String,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringConfig {
    /// Port serving /health, the REST API and /ws
    #[serde(default = "default_health_port")]
    pub health_port: u16,
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryConfig {
    #[serde(default = "default_health_check_interval", with = "humantime_serde")]
    pub health_check_interval: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsulConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_consul_host")]
    pub host: String,
    #[serde(default = "default_consul_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthManagementConfig {
    #[serde(default = "default_true")]
    pub auto_recovery_enabled: bool,
    #[serde(default = "default_true")]
    pub lazy_detection_enabled: bool,
    /// Relative contribution below which an agent is considered lazy
    #[serde(default = "default_lazy_threshold")]
    pub lazy_threshold: f64,
    /// Number of recent contributions kept per agent
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default = "default_max_restarts")]
    pub max_restarts_per_hour: usize,
    #[serde(default = "default_restart_cooldown", with = "humantime_serde")]
    pub restart_cooldown: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventStoreConfig {
    #[serde(default = "default_max_events")]
    pub max_events: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "text" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_true() -> bool {
    true
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_gateway_port() -> u16 {
    50051
}

fn default_health_port() -> u16 {
    50201
}

fn default_health_check_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_consul_host() -> String {
    "consul-server".to_string()
}

fn default_consul_port() -> u16 {
    8500
}

fn default_lazy_threshold() -> f64 {
    0.1
}

fn default_window_size() -> usize {
    100
}

fn default_max_restarts() -> usize {
    5
}

fn default_restart_cooldown() -> Duration {
    Duration::from_secs(60)
}

fn default_max_events() -> usize {
    1000
}

fn default_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    10_000
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_retries() -> u32 {
    3
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_bind_address(),
            port: default_gateway_port(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            health_port: default_health_port(),
            metrics_enabled: true,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            health_check_interval: default_health_check_interval(),
        }
    }
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_consul_host(),
            port: default_consul_port(),
        }
    }
}

impl Default for HealthManagementConfig {
    fn default() -> Self {
        Self {
            auto_recovery_enabled: true,
            lazy_detection_enabled: true,
            lazy_threshold: default_lazy_threshold(),
            window_size: default_window_size(),
            max_restarts_per_hour: default_max_restarts(),
            restart_cooldown: default_restart_cooldown(),
        }
    }
}

impl Default for EventStoreConfig {
    fn default() -> Self {
        Self {
            max_events: default_max_events(),
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            request_timeout: default_request_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for AolConfig {
    fn default() -> Self {
        let name = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .map(|h| format!("aol-core-{h}"))
            .unwrap_or_else(|| "aol-core".to_string());

        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ConfigMetadata {
                name,
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: CoreSpec::default(),
        }
    }
}

impl AolConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. AOL_CONFIG_PATH environment variable
    /// 2. ./aol-config.yaml (working directory)
    /// 3. ~/.aol/config.yaml (user home)
    /// 4. /etc/aol/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("AOL_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./aol-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".aol").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/aol/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path fails if missing or invalid
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        let mut config = match Self::discover_config() {
            Some(config_path) => {
                tracing::info!("Loading configuration from discovered path: {:?}", config_path);
                Self::from_yaml_file(config_path)?
            }
            None => {
                tracing::warn!("No configuration file found in standard locations. Using defaults.");
                Self::default()
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Applies overrides from an arbitrary lookup
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("AOL_HEALTH_PORT") {
            match val.parse() {
                Ok(port) => {
                    tracing::info!("Environment override: AOL_HEALTH_PORT={}", port);
                    self.spec.monitoring.health_port = port;
                }
                Err(_) => tracing::warn!("Invalid value for AOL_HEALTH_PORT: '{}'. Ignoring.", val),
            }
        }

        if let Some(val) = lookup("AOL_GATEWAY_PORT") {
            match val.parse() {
                Ok(port) => {
                    tracing::info!("Environment override: AOL_GATEWAY_PORT={}", port);
                    self.spec.gateway.port = port;
                }
                Err(_) => tracing::warn!("Invalid value for AOL_GATEWAY_PORT: '{}'. Ignoring.", val),
            }
        }

        if let Some(val) = lookup("CONSUL_HTTP_ADDR") {
            match parse_consul_addr(&val) {
                Some((host, port)) => {
                    self.spec.consul.enabled = true;
                    self.spec.consul.host = host;
                    if let Some(port) = port {
                        self.spec.consul.port = port;
                    }
                    tracing::info!(
                        "Environment override: CONSUL_HTTP_ADDR={}:{}",
                        self.spec.consul.host,
                        self.spec.consul.port
                    );
                }
                None => tracing::warn!("Invalid value for CONSUL_HTTP_ADDR: '{}'. Ignoring.", val),
            }
        }

        if let Some(val) = lookup("AOL_LOG_FORMAT") {
            self.spec.logging.format = val;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!("Invalid apiVersion: '{}'. Must be '{}'", self.api_version, API_VERSION);
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let spec = &self.spec;
        if spec.gateway.port == 0 || spec.monitoring.health_port == 0 {
            anyhow::bail!("Ports must be non-zero");
        }
        if spec.gateway.port == spec.monitoring.health_port {
            anyhow::bail!(
                "spec.gateway.port and spec.monitoring.healthPort must differ (both {})",
                spec.gateway.port
            );
        }

        let threshold = spec.health_management.lazy_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            anyhow::bail!("spec.healthManagement.lazyThreshold must be in (0, 1], got {}", threshold);
        }
        if spec.health_management.window_size == 0 {
            anyhow::bail!("spec.healthManagement.windowSize must be at least 1");
        }
        if spec.router.workers == 0 {
            anyhow::bail!("spec.router.workers must be at least 1");
        }
        if spec.router.queue_capacity == 0 {
            anyhow::bail!("spec.router.queueCapacity must be at least 1");
        }
        if spec.event_store.max_events == 0 {
            anyhow::bail!("spec.eventStore.maxEvents must be at least 1");
        }
        if spec.consul.enabled && spec.consul.host.is_empty() {
            anyhow::bail!("spec.consul.host cannot be empty when Consul is enabled");
        }

        Ok(())
    }

    pub fn health_bind_address(&self) -> String {
        format!("{}:{}", self.spec.gateway.host, self.spec.monitoring.health_port)
    }

    pub fn gateway_bind_address(&self) -> String {
        format!("{}:{}", self.spec.gateway.host, self.spec.gateway.port)
    }
}

/// Parses `CONSUL_HTTP_ADDR` values such as `consul:8500` or `http://10.0.0.2:8500`.
pub fn parse_consul_addr(value: &str) -> Option<(String, Option<u16>)> {
    let trimmed = value
        .trim()
        .trim_start_matches("http://")
        .trim_start_matches("https://")
        .trim_end_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse().ok()?;
            if host.is_empty() {
                return None;
            }
            Some((host.to_string(), Some(port)))
        }
        None => Some((trimmed.to_string(), None)),
    }
}
