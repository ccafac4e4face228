//! # Stage: Adaptive Routing Policy
//!
//! ## Responsibility
//! Decide where work goes. For queued tasks, pick the least-loaded available
//! backend that serves the task type. For outbound requests, pick between a
//! local/edge and a remote/cloud location from live health probes, measured
//! latency, and an operating-mode override.
//!
//! ## Guarantees
//! - Deterministic tie-break: equal load resolves to registration order;
//!   equal latency resolves to the edge
//! - Degrading, not failing: `route_request` always yields a decision; when
//!   nothing is healthy the decision is flagged `degraded` and says so
//! - Off-grid wins: the disconnected operating mode forces the edge location
//!   regardless of strategy or health
//!
//! ## NOT Responsible For
//! - Probing endpoints (that belongs to `health`)
//! - Mutating load counters (that belongs to `dispatch::supervisor`)

pub mod capability;
pub mod config;
pub mod router;

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::dispatch::Priority;

// Re-exports for convenience
pub use capability::capability_first_available;
pub use config::{LocationConfig, RoutingConfig};
pub use router::RoutingPolicy;

/// Routing strategy.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum RouteStrategy {
    /// Least-loaded available backend serving the content type.
    CapabilityFirstAvailable,
    /// Edge primary, cloud secondary.
    #[default]
    EdgeFirst,
    /// Cloud primary, edge secondary.
    CloudFirst,
    /// Freshly probe both locations and take the faster healthy one.
    Balanced,
}

impl RouteStrategy {
    /// Stable label used in logs, metrics, and serialized stats.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CapabilityFirstAvailable => "capability_first_available",
            Self::EdgeFirst => "edge_first",
            Self::CloudFirst => "cloud_first",
            Self::Balanced => "balanced",
        }
    }
}

impl fmt::Display for RouteStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-signalled operating mode.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
    /// Normal operation; the configured strategy applies.
    #[default]
    Connected,
    /// Disconnected operation; every request goes to the edge.
    OffGrid,
}

/// Location identifier for the edge.
pub const EDGE: &str = "edge";
/// Location identifier for the cloud.
pub const CLOUD: &str = "cloud";

/// What the caller knows about a request before it is routed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestProfile {
    /// Content type; doubles as the capability tag for backend selection.
    pub content_type: String,
    /// Request priority.
    #[serde(default)]
    pub priority: Priority,
    /// Payload size in bytes.
    #[serde(default)]
    pub size_bytes: u64,
}

impl RequestProfile {
    /// Profile with normal priority and unknown size.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn new(content_type: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            priority: Priority::Normal,
            size_bytes: 0,
        }
    }
}

/// Outcome of a single routing call. Produced fresh, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteDecision {
    /// Chosen location: `"edge"`, `"cloud"`, or a backend id.
    pub location: String,
    /// Endpoint address of the chosen location.
    pub endpoint: String,
    /// Human-readable reason for the choice.
    pub justification: String,
    /// Measured latency of the chosen endpoint, when known.
    #[serde(
        rename = "latency_ms",
        serialize_with = "serialize_latency_ms",
        skip_serializing_if = "Option::is_none"
    )]
    pub latency: Option<Duration>,
    /// `true` when the chosen endpoint is not known to be healthy.
    pub degraded: bool,
}

fn serialize_latency_ms<S: serde::Serializer>(
    latency: &Option<Duration>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match latency {
        Some(d) => serializer.serialize_f64(d.as_secs_f64() * 1000.0),
        None => serializer.serialize_none(),
    }
}

/// Returned by `select` when no backend can take a task.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoutingError {
    /// No online backend with spare capacity serves the capability.
    #[error("no available backend for capability '{capability}'")]
    NotAvailable {
        /// Requested capability tag.
        capability: String,
    },
}

/// Last known state of one routing endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointStats {
    /// Endpoint address.
    pub endpoint: String,
    /// Last probe verdict; `false` if never probed.
    pub healthy: bool,
    /// Last measured latency in milliseconds.
    pub latency_ms: Option<f64>,
}

/// Snapshot returned by `get_routing_stats`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingStats {
    /// Configured strategy.
    pub strategy: RouteStrategy,
    /// Configured default operating mode.
    pub operating_mode: OperatingMode,
    /// Whether fallback to the secondary location is enabled.
    pub fallback_enabled: bool,
    /// Per-location stats keyed by location identifier.
    pub endpoints: BTreeMap<String, EndpointStats>,
}
