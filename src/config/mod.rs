//! # Stage: Declarative Dispatch Configuration
//!
//! ## Responsibility
//! Parse and validate the TOML file that describes the backend fleet, the
//! timeouts of the dispatch core, the health-probe cadence, and the edge/cloud
//! routing policy.
//!
//! ## Guarantees
//! - Deterministic: same TOML input always produces the same `DispatchConfig`
//! - Defaulted: every section and field has a documented default, so an
//!   empty file is a valid (if fleet-less) configuration
//! - Validated: semantic constraints are checked before a config is accepted
//! - Schema-exportable: JSON Schema output enables IDE autocomplete
//!
//! ## NOT Responsible For
//! - Building the coordinator from config (that belongs to `dispatch`)
//! - Probing or routing (that belongs to `health` / `routing`)

pub mod loader;
pub mod validation;

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub use crate::routing::config::{LocationConfig, RoutingConfig};

// ── Default value functions ──────────────────────────────────────────────

/// Default retry budget per task.
fn default_max_retries() -> u32 {
    3
}

/// Default backend invocation timeout: 30s.
fn default_invoke_timeout_ms() -> u64 {
    30_000
}

/// Default sleep before re-enqueueing a task that found no capacity: 1s.
fn default_requeue_backoff_ms() -> u64 {
    1_000
}

/// Default health loop interval: 30s.
fn default_health_interval_ms() -> u64 {
    30_000
}

/// Default per-probe timeout: 5s.
fn default_probe_timeout_ms() -> u64 {
    5_000
}

/// Default backend health cache TTL: 30s.
fn default_health_cache_ttl_ms() -> u64 {
    30_000
}

/// Default health check path.
fn default_health_path() -> String {
    "/health".to_string()
}

/// Default per-backend concurrency.
fn default_max_load() -> u32 {
    1
}

/// Default bind host for the HTTP surface.
fn default_host() -> String {
    "0.0.0.0".to_string()
}

/// Default bind port for the HTTP surface.
fn default_port() -> u16 {
    8080
}

/// Default maximum request body: 10 MiB.
fn default_max_request_size() -> usize {
    10 * 1024 * 1024
}

// ── Top-level config ─────────────────────────────────────────────────────

/// Root configuration for a dispatch process.
///
/// # Example
///
/// ```toml
/// [coordinator]
/// max_retries = 3
///
/// [[backends]]
/// id = "gpu-a"
/// endpoint = "http://10.0.0.5:9000"
/// capabilities = ["llm", "vision"]
/// max_load = 4
///
/// [routing]
/// strategy = "edge_first"
///
/// [routing.edge]
/// endpoint = "http://127.0.0.1:8081"
///
/// [routing.cloud]
/// endpoint = "https://cloud.example.com"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct DispatchConfig {
    /// Dispatch queue and execution supervisor settings.
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    /// Health prober settings.
    #[serde(default)]
    pub health: HealthConfig,
    /// Statically configured backends, registered in file order.
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
    /// Edge/cloud routing policy.
    #[serde(default)]
    pub routing: RoutingConfig,
    /// HTTP surface bind settings (used with the `web-api` feature).
    #[serde(default)]
    pub server: ServerConfig,
    /// Logging output settings.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ── Coordinator ──────────────────────────────────────────────────────────

/// Dispatch queue and execution supervisor settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Retries allowed after the first failed attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Upper bound on a single backend invocation (ms).
    #[serde(default = "default_invoke_timeout_ms")]
    pub invoke_timeout_ms: u64,
    /// Sleep before re-enqueueing a task that found no capacity (ms).
    #[serde(default = "default_requeue_backoff_ms")]
    pub requeue_backoff_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            invoke_timeout_ms: default_invoke_timeout_ms(),
            requeue_backoff_ms: default_requeue_backoff_ms(),
        }
    }
}

impl CoordinatorConfig {
    /// Backend invocation timeout as a [`Duration`].
    pub fn invoke_timeout(&self) -> Duration {
        Duration::from_millis(self.invoke_timeout_ms)
    }

    /// Requeue backoff as a [`Duration`].
    pub fn requeue_backoff(&self) -> Duration {
        Duration::from_millis(self.requeue_backoff_ms)
    }
}

// ── Health ───────────────────────────────────────────────────────────────

/// Health prober settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct HealthConfig {
    /// Interval between full fleet sweeps (ms).
    #[serde(default = "default_health_interval_ms")]
    pub interval_ms: u64,
    /// Timeout for a single probe (ms).
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// How long a backend snapshot is served from cache (ms).
    #[serde(default = "default_health_cache_ttl_ms")]
    pub cache_ttl_ms: u64,
    /// Path appended to each endpoint for the reachability probe.
    #[serde(default = "default_health_path")]
    pub path: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_health_interval_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            cache_ttl_ms: default_health_cache_ttl_ms(),
            path: default_health_path(),
        }
    }
}

impl HealthConfig {
    /// Sweep interval as a [`Duration`].
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Probe timeout as a [`Duration`].
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Backend cache TTL as a [`Duration`].
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }
}

// ── Backends ─────────────────────────────────────────────────────────────

/// One statically configured compute backend.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct BackendConfig {
    /// Stable backend identifier.
    pub id: String,
    /// Base URL, e.g. `http://10.0.0.5:9000`.
    pub endpoint: String,
    /// Capability tags; `"all"` matches every task type.
    pub capabilities: Vec<String>,
    /// Maximum concurrent tasks.
    #[serde(default = "default_max_load")]
    pub max_load: u32,
}

// ── Server ───────────────────────────────────────────────────────────────

/// Bind settings for the HTTP surface.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ServerConfig {
    /// IP address or hostname to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// TCP port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum accepted request body in bytes.
    #[serde(default = "default_max_request_size")]
    pub max_request_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_request_size: default_max_request_size(),
        }
    }
}

// ── Observability ────────────────────────────────────────────────────────

/// Logging output settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ObservabilityConfig {
    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable, colorized log output.
    #[default]
    Pretty,
    /// Structured JSON log output for machine consumption.
    Json,
}

/// Export the JSON Schema for [`DispatchConfig`].
///
/// # Errors
///
/// Returns `serde_json::Error` if schema serialization fails.
pub fn export_schema() -> Result<String, serde_json::Error> {
    let schema = schemars::schema_for!(DispatchConfig);
    serde_json::to_string_pretty(&schema)
}
