// Copyright (c) 2026 AOL Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Manifest Validation
//!
//! Validates AOL service manifests (`manifest.yaml`) and service configuration
//! files (`config.yaml`). Validation never fails fast: every problem found is
//! reported as a [`ValidationIssue`] with a dotted path into the document, and
//! a manifest is valid when none of the issues is an error.
//!
//! # Architecture
//!
//! - **Layer:** Domain
//! - **Purpose:** Schema and semantic checks for manifests
//!
//! The schema is a static tree of [`Field`] descriptors. Required fields,
//! value types, allowed values and the version pattern are checked first;
//! semantic rules (port ranges, dependency consistency) run afterwards on the
//! raw document.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

// ============================================================================
// Issues and Results
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationSeverity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
    pub severity: ValidationSeverity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    fn new(path: impl Into<String>, message: impl Into<String>, severity: ValidationSeverity) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            severity,
            value: None,
            suggestion: None,
        }
    }

    fn error(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(path, message, ValidationSeverity::Error)
    }

    fn warning(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(path, message, ValidationSeverity::Warning)
    }

    fn info(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(path, message, ValidationSeverity::Info)
    }

    fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.severity {
            ValidationSeverity::Error => "✗",
            ValidationSeverity::Warning => "!",
            ValidationSeverity::Info => "i",
        };
        write!(f, "{} [{}] {}", prefix, self.path, self.message)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    fn from_issues(issues: Vec<ValidationIssue>) -> Self {
        let valid = !issues
            .iter()
            .any(|i| i.severity == ValidationSeverity::Error);
        Self { valid, issues }
    }

    pub fn errors(&self) -> Vec<&ValidationIssue> {
        self.by_severity(ValidationSeverity::Error)
    }

    pub fn warnings(&self) -> Vec<&ValidationIssue> {
        self.by_severity(ValidationSeverity::Warning)
    }

    fn by_severity(&self, severity: ValidationSeverity) -> Vec<&ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == severity).collect()
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.valid && self.issues.is_empty() {
            return write!(f, "✓ Manifest is valid");
        }
        let status = if self.valid { "✓ Valid" } else { "✗ Invalid" };
        writeln!(f, "{} ({} issue(s))", status, self.issues.len())?;
        for issue in &self.issues {
            writeln!(f, "  {}", issue)?;
        }
        Ok(())
    }
}

// ============================================================================
// Schema
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum Kind {
    Str,
    Bool,
    Map(&'static [Field]),
    AnyMap,
    List(&'static [Field]),
    AnyList,
}

#[derive(Debug, Clone, Copy)]
struct Field {
    name: &'static str,
    kind: Kind,
    required: bool,
    allowed: &'static [&'static str],
    pattern: Option<&'static str>,
}

const fn field(name: &'static str, kind: Kind, required: bool) -> Field {
    Field {
        name,
        kind,
        required,
        allowed: &[],
        pattern: None,
    }
}

pub const VALID_KINDS: &[&str] = &["AOLAgent", "AOLTool", "AOLPlugin", "AOLService"];
pub const VALID_API_VERSIONS: &[&str] = &["v1"];
const VERSION_PATTERN: &str = r"^\d+\.\d+\.\d+$";

const METADATA_FIELDS: &[Field] = &[
    field("name", Kind::Str, true),
    Field {
        pattern: Some(VERSION_PATTERN),
        ..field("version", Kind::Str, true)
    },
    field("labels", Kind::AnyMap, false),
    field("description", Kind::Str, false),
];

const ENDPOINT_FIELDS: &[Field] = &[
    field("grpc", Kind::Str, true),
    field("health", Kind::Str, true),
    field("metrics", Kind::Str, false),
    field("sidecar", Kind::Str, false),
];

const DEPENDENCY_FIELDS: &[Field] = &[
    field("service", Kind::Str, true),
    field("optional", Kind::Bool, false),
];

const DATA_REQUIREMENT_FIELDS: &[Field] = &[
    field("enabled", Kind::Bool, true),
    field("collections", Kind::AnyList, false),
    field("accessRequests", Kind::AnyList, false),
];

const SPEC_FIELDS: &[Field] = &[
    field("endpoints", Kind::Map(ENDPOINT_FIELDS), true),
    field("dependencies", Kind::List(DEPENDENCY_FIELDS), false),
    field("dataRequirements", Kind::Map(DATA_REQUIREMENT_FIELDS), false),
    field("configSchema", Kind::AnyList, false),
    field("communication", Kind::AnyMap, false),
    field("integrations", Kind::AnyMap, false),
    field("resilience", Kind::AnyMap, false),
    field("health", Kind::AnyMap, false),
    field("monitoring", Kind::AnyMap, false),
    field("resources", Kind::AnyMap, false),
];

const MANIFEST_FIELDS: &[Field] = &[
    Field {
        allowed: VALID_KINDS,
        ..field("kind", Kind::Str, true)
    },
    Field {
        allowed: VALID_API_VERSIONS,
        ..field("apiVersion", Kind::Str, true)
    },
    field("metadata", Kind::Map(METADATA_FIELDS), true),
    field("spec", Kind::Map(SPEC_FIELDS), true),
];

static VERSION_RE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(VERSION_PATTERN).ok());

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn expected_name(kind: Kind) -> &'static str {
    match kind {
        Kind::Str => "string",
        Kind::Bool => "boolean",
        Kind::Map(_) | Kind::AnyMap => "object",
        Kind::List(_) | Kind::AnyList => "array",
    }
}

fn matches_kind(kind: Kind, value: &Value) -> bool {
    match kind {
        Kind::Str => value.is_string(),
        Kind::Bool => value.is_boolean(),
        Kind::Map(_) | Kind::AnyMap => value.is_object(),
        Kind::List(_) | Kind::AnyList => value.is_array(),
    }
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

// ============================================================================
// ManifestValidator
// ============================================================================

/// Validates service manifests against the AOL manifest schema
#[derive(Debug, Clone, Default)]
pub struct ManifestValidator {
    /// Report unknown fields as warnings
    pub strict_mode: bool,
}

impl ManifestValidator {
    pub fn new(strict_mode: bool) -> Self {
        Self { strict_mode }
    }

    pub fn validate_file(&self, path: impl AsRef<Path>) -> ValidationResult {
        match read_yaml(path.as_ref(), "Manifest") {
            Ok(manifest) => self.validate(&manifest),
            Err(issue) => ValidationResult::from_issues(vec![issue]),
        }
    }

    pub fn validate(&self, manifest: &Value) -> ValidationResult {
        let mut issues = Vec::new();
        self.validate_fields(manifest, MANIFEST_FIELDS, "", &mut issues);
        validate_semantics(manifest, &mut issues);
        ValidationResult::from_issues(issues)
    }

    fn validate_fields(&self, data: &Value, fields: &[Field], prefix: &str, issues: &mut Vec<ValidationIssue>) {
        let Some(object) = data.as_object() else {
            return;
        };

        for spec in fields {
            let path = join(prefix, spec.name);
            let Some(value) = object.get(spec.name) else {
                if spec.required {
                    issues.push(
                        ValidationIssue::error(&path, format!("Required field '{}' is missing", spec.name))
                            .with_suggestion(format!("Add '{}' to the manifest", spec.name)),
                    );
                }
                continue;
            };

            if !matches_kind(spec.kind, value) {
                issues.push(
                    ValidationIssue::error(
                        &path,
                        format!("Expected {}, got {}", expected_name(spec.kind), type_name(value)),
                    )
                    .with_value(value.clone()),
                );
                continue;
            }

            if let Some(text) = value.as_str() {
                if !spec.allowed.is_empty() && !spec.allowed.contains(&text) {
                    issues.push(
                        ValidationIssue::error(
                            &path,
                            format!("Invalid value '{}'. Allowed: {:?}", text, spec.allowed),
                        )
                        .with_value(value.clone())
                        .with_suggestion(format!("Use one of: {}", spec.allowed.join(", "))),
                    );
                }
                if let Some(pattern) = spec.pattern {
                    let matched = VERSION_RE.as_ref().is_some_and(|re| re.is_match(text));
                    if !matched {
                        issues.push(
                            ValidationIssue::warning(
                                &path,
                                format!("Value '{}' does not match pattern {}", text, pattern),
                            )
                            .with_value(value.clone()),
                        );
                    }
                }
            }

            match spec.kind {
                Kind::Map(children) => self.validate_fields(value, children, &path, issues),
                Kind::List(item_fields) => {
                    for (index, item) in value.as_array().into_iter().flatten().enumerate() {
                        let item_path = format!("{path}[{index}]");
                        if item.is_object() {
                            self.validate_fields(item, item_fields, &item_path, issues);
                        } else {
                            issues.push(ValidationIssue::error(
                                item_path,
                                format!("Expected object, got {}", type_name(item)),
                            ));
                        }
                    }
                }
                _ => {}
            }
        }

        if self.strict_mode {
            for key in object.keys() {
                if !fields.iter().any(|f| f.name == key) {
                    issues.push(ValidationIssue::warning(join(prefix, key), format!("Unknown field '{key}'")));
                }
            }
        }
    }
}

fn parse_port(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn has_core_dependency(spec: &Value) -> (bool, bool) {
    let deps = spec
        .get("dependencies")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let has_core = deps
        .iter()
        .any(|d| d.get("service").and_then(Value::as_str) == Some("aol-core"));
    (has_core, !deps.is_empty())
}

fn validate_semantics(manifest: &Value, issues: &mut Vec<ValidationIssue>) {
    let Some(spec) = manifest.get("spec").filter(|s| s.is_object()) else {
        return;
    };

    if let Some(endpoints) = spec.get("endpoints").and_then(Value::as_object) {
        for (name, raw) in endpoints {
            let path = format!("spec.endpoints.{name}");
            match parse_port(raw) {
                Some(port) if !(1..=65535).contains(&port) => issues.push(
                    ValidationIssue::error(path, format!("Port {port} is out of valid range (1-65535)"))
                        .with_value(Value::from(port)),
                ),
                Some(_) => {}
                None => issues.push(
                    ValidationIssue::error(path, format!("Invalid port value: {}", display_value(raw)))
                        .with_value(raw.clone()),
                ),
            }
        }
    }

    let (has_core, has_deps) = has_core_dependency(spec);
    let data_enabled = spec
        .pointer("/dataRequirements/enabled")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    if data_enabled && !has_core {
        issues.push(
            ValidationIssue::warning(
                "spec.dependencies",
                "Data requirements enabled but no aol-core dependency declared",
            )
            .with_suggestion("Add aol-core to dependencies when using data storage"),
        );
    }

    if has_deps && !has_core {
        issues.push(
            ValidationIssue::info("spec.dependencies", "aol-core dependency is recommended for AOL services")
                .with_suggestion("Add aol-core as a required dependency"),
        );
    }
}

fn read_yaml(path: &Path, what: &str) -> Result<Value, ValidationIssue> {
    if !path.exists() {
        return Err(ValidationIssue::error(
            "file",
            format!("{} file not found: {}", what, path.display()),
        ));
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| ValidationIssue::error("file", format!("Cannot read file: {e}")))?;
    serde_yaml::from_str::<Value>(&content)
        .map_err(|e| ValidationIssue::error("file", format!("Invalid YAML: {e}")))
}

// ============================================================================
// ConfigValidator
// ============================================================================

/// Validates a service `config.yaml`
#[derive(Debug, Clone, Default)]
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate_file(&self, path: impl AsRef<Path>) -> ValidationResult {
        match read_yaml(path.as_ref(), "Config") {
            Ok(config) => self.validate(&config),
            Err(issue) => ValidationResult::from_issues(vec![issue]),
        }
    }

    pub fn validate(&self, config: &Value) -> ValidationResult {
        let mut issues = Vec::new();

        let data_client_enabled = config
            .pointer("/dataClient/enabled")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let endpoint = config
            .pointer("/dataClient/aolCoreEndpoint")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if data_client_enabled && endpoint.is_empty() {
            issues.push(ValidationIssue::warning(
                "dataClient.aolCoreEndpoint",
                "Data client enabled but no aolCoreEndpoint specified",
            ));
        }

        if let Some(breaker) = config.pointer("/resilience/circuitBreaker") {
            let enabled = breaker.get("enabled").and_then(Value::as_bool).unwrap_or(false);
            let threshold = breaker
                .get("failureThreshold")
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            if enabled && threshold < 1.0 {
                issues.push(
                    ValidationIssue::warning(
                        "resilience.circuitBreaker.failureThreshold",
                        "Failure threshold should be at least 1",
                    )
                    .with_value(Value::from(threshold)),
                );
            }
        }

        ValidationResult::from_issues(issues)
    }
}
