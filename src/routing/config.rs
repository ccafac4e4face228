//! Routing configuration types.
//!
//! Provides [`RoutingConfig`] for choosing the strategy, the edge and cloud
//! locations, fallback behaviour, and the operating-mode override. All fields
//! have defaults and are (de)serialisable via serde for TOML/JSON config files.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{OperatingMode, RouteStrategy};

// ── Default value functions ────────────────────────────────────────────

/// Default fallback behaviour for `edge_first` / `cloud_first`.
fn default_fallback_enabled() -> bool {
    true
}

/// Default TTL for cached location probes: 30s.
fn default_probe_cache_ttl_ms() -> u64 {
    30_000
}

/// Default local/edge endpoint.
fn default_edge_endpoint() -> String {
    "http://127.0.0.1:8081".to_string()
}

/// Default remote/cloud endpoint.
fn default_cloud_endpoint() -> String {
    "http://127.0.0.1:8082".to_string()
}

// ── LocationConfig ─────────────────────────────────────────────────────

/// One compute location a request can be routed to.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct LocationConfig {
    /// Base URL of the location.
    pub endpoint: String,
}

impl LocationConfig {
    fn edge() -> Self {
        Self {
            endpoint: default_edge_endpoint(),
        }
    }

    fn cloud() -> Self {
        Self {
            endpoint: default_cloud_endpoint(),
        }
    }
}

// ── RoutingConfig ──────────────────────────────────────────────────────

/// Configuration for the edge/cloud routing policy.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct RoutingConfig {
    /// Strategy used by `route_request`.  Default: `edge_first`.
    #[serde(default)]
    pub strategy: RouteStrategy,

    /// Whether `edge_first` / `cloud_first` may fall back to the secondary
    /// location when the primary is unhealthy.  Default: `true`.
    #[serde(default = "default_fallback_enabled")]
    pub fallback_enabled: bool,

    /// How long a location probe is reused by the cached strategies (ms).
    #[serde(default = "default_probe_cache_ttl_ms")]
    pub probe_cache_ttl_ms: u64,

    /// Default operating mode.  `off_grid` forces every request to the edge.
    #[serde(default)]
    pub operating_mode: OperatingMode,

    /// Local/edge location.
    #[serde(default = "LocationConfig::edge")]
    pub edge: LocationConfig,

    /// Remote/cloud location.
    #[serde(default = "LocationConfig::cloud")]
    pub cloud: LocationConfig,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            strategy: RouteStrategy::default(),
            fallback_enabled: default_fallback_enabled(),
            probe_cache_ttl_ms: default_probe_cache_ttl_ms(),
            operating_mode: OperatingMode::default(),
            edge: LocationConfig::edge(),
            cloud: LocationConfig::cloud(),
        }
    }
}

impl RoutingConfig {
    /// Location probe cache TTL as a [`std::time::Duration`].
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn probe_cache_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.probe_cache_ttl_ms)
    }
}
