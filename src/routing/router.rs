//! Routing policy.
//!
//! The [`RoutingPolicy`] combines the [`BackendRegistry`] snapshot with the
//! [`HealthProber`] cache to answer two questions: which backend should run a
//! queued task, and which location (edge or cloud) should serve an outbound
//! request.
//!
//! `edge_first` and `cloud_first` reuse location probes younger than
//! `probe_cache_ttl_ms`. `balanced` probes both locations fresh on every call
//! so that its latency comparison is never made on stale numbers.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use super::capability::capability_first_available;
use super::config::RoutingConfig;
use super::{
    EndpointStats, OperatingMode, RequestProfile, RouteDecision, RouteStrategy, RoutingError,
    RoutingStats, CLOUD, EDGE,
};
use crate::health::{HealthProber, HealthSnapshot};
use crate::registry::{Backend, BackendRegistry};

/// Justification attached to every degraded decision.
pub const NO_HEALTHY_ENDPOINTS: &str = "no healthy endpoints available";

/// Justification attached to off-grid decisions.
pub const OFF_GRID_FORCES_EDGE: &str = "off-grid mode forces edge";

/// Health prober cache key for a routing location.
fn cache_key(location: &str) -> String {
    format!("location:{location}")
}

/// Which of two probed locations wins a latency race.
///
/// Only reachable snapshots compete; an exact tie goes to `first`. Returns
/// `None` when neither is reachable.
///
/// # Panics
///
/// This function never panics.
pub fn pick_faster(first: &HealthSnapshot, second: &HealthSnapshot) -> Option<bool> {
    match (first.reachable, second.reachable) {
        (true, true) => Some(second.latency >= first.latency),
        (true, false) => Some(true),
        (false, true) => Some(false),
        (false, false) => None,
    }
}

/// Routes tasks to backends and requests to locations.
///
/// Thread-safe: holds only shared handles; all mutable state lives in the
/// registry and the prober cache.
///
/// # Panics
///
/// This type and its methods never panic.
#[derive(Debug)]
pub struct RoutingPolicy {
    config: RoutingConfig,
    registry: Arc<BackendRegistry>,
    prober: Arc<HealthProber>,
}

impl RoutingPolicy {
    /// Create a policy over the given registry and prober.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn new(
        config: RoutingConfig,
        registry: Arc<BackendRegistry>,
        prober: Arc<HealthProber>,
    ) -> Self {
        Self {
            config,
            registry,
            prober,
        }
    }

    /// Routing configuration in effect.
    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    /// Pick a backend for a task of type `capability`.
    ///
    /// Reads one registry snapshot; never probes.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::NotAvailable`] when no online backend with
    /// spare capacity serves `capability`.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn select_backend(&self, capability: &str) -> Result<Backend, RoutingError> {
        capability_first_available(&self.registry.all(), capability).ok_or_else(|| {
            RoutingError::NotAvailable {
                capability: capability.to_string(),
            }
        })
    }

    /// Route `profile` with an explicit `strategy`.
    ///
    /// Only `capability_first_available` can fail; the location strategies
    /// always produce a decision, degraded if nothing is healthy.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::NotAvailable`] from the capability strategy.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub async fn select(
        &self,
        profile: &RequestProfile,
        strategy: RouteStrategy,
    ) -> Result<RouteDecision, RoutingError> {
        let decision = match strategy {
            RouteStrategy::CapabilityFirstAvailable => {
                let backend = self.select_backend(&profile.content_type)?;
                RouteDecision {
                    justification: format!(
                        "least-loaded available backend for '{}' (load {}/{})",
                        profile.content_type, backend.current_load, backend.max_load
                    ),
                    latency: self.prober.cached(&backend.id).and_then(|s| s.latency),
                    location: backend.id,
                    endpoint: backend.endpoint,
                    degraded: false,
                }
            }
            RouteStrategy::EdgeFirst => self.preferred(EDGE, CLOUD).await,
            RouteStrategy::CloudFirst => self.preferred(CLOUD, EDGE).await,
            RouteStrategy::Balanced => self.balanced().await,
        };
        self.record(strategy.as_str(), &decision);
        Ok(decision)
    }

    /// Route `profile` with the configured strategy under `mode`.
    ///
    /// Off-grid (requested by the caller or configured) returns the edge
    /// location without probing. A capability strategy that finds nothing
    /// degrades to the edge instead of failing.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub async fn route_request(&self, profile: &RequestProfile, mode: OperatingMode) -> RouteDecision {
        if mode == OperatingMode::OffGrid || self.config.operating_mode == OperatingMode::OffGrid {
            let cached = self.prober.cached(&cache_key(EDGE));
            let decision = RouteDecision {
                location: EDGE.to_string(),
                endpoint: self.endpoint(EDGE).to_string(),
                justification: OFF_GRID_FORCES_EDGE.to_string(),
                latency: cached.as_ref().and_then(|s| s.latency),
                degraded: !cached.is_some_and(|s| s.reachable),
            };
            self.record("off_grid", &decision);
            return decision;
        }

        match self.select(profile, self.config.strategy).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(error = %e, "capability routing exhausted, degrading to edge");
                let decision = self.degraded(EDGE, None);
                self.record(self.config.strategy.as_str(), &decision);
                decision
            }
        }
    }

    /// Current routing view built from the probe cache.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn stats(&self) -> RoutingStats {
        let endpoints: BTreeMap<String, EndpointStats> = [EDGE, CLOUD]
            .into_iter()
            .map(|location| {
                let cached = self.prober.cached(&cache_key(location));
                let stats = EndpointStats {
                    endpoint: self.endpoint(location).to_string(),
                    healthy: cached.as_ref().is_some_and(|s| s.reachable),
                    latency_ms: cached.and_then(|s| s.latency_ms()),
                };
                (location.to_string(), stats)
            })
            .collect();

        RoutingStats {
            strategy: self.config.strategy,
            operating_mode: self.config.operating_mode,
            fallback_enabled: self.config.fallback_enabled,
            endpoints,
        }
    }

    // ── Location strategies ──────────────────────────────────────────────

    async fn preferred(&self, primary: &'static str, secondary: &'static str) -> RouteDecision {
        let ttl = Some(self.config.probe_cache_ttl());
        let first = self.probe(primary, ttl).await;
        if first.reachable {
            return self.healthy(primary, &first, format!("{primary} healthy"));
        }

        if self.config.fallback_enabled {
            let second = self.probe(secondary, ttl).await;
            if second.reachable {
                return self.healthy(
                    secondary,
                    &second,
                    format!("{primary} unhealthy, falling back to {secondary}"),
                );
            }
        }

        self.degraded(primary, first.error)
    }

    async fn balanced(&self) -> RouteDecision {
        let (edge, cloud) = tokio::join!(self.probe(EDGE, None), self.probe(CLOUD, None));
        match pick_faster(&edge, &cloud) {
            Some(true) if cloud.reachable => {
                self.healthy(EDGE, &edge, "edge lower latency".to_string())
            }
            Some(true) => self.healthy(EDGE, &edge, "only edge healthy".to_string()),
            Some(false) if edge.reachable => {
                self.healthy(CLOUD, &cloud, "cloud lower latency".to_string())
            }
            Some(false) => self.healthy(CLOUD, &cloud, "only cloud healthy".to_string()),
            None => self.degraded(EDGE, edge.error),
        }
    }

    // ── Helpers ──────────────────────────────────────────────────────────

    async fn probe(&self, location: &str, ttl: Option<std::time::Duration>) -> HealthSnapshot {
        self.prober
            .probe_location(&cache_key(location), self.endpoint(location), ttl)
            .await
    }

    fn endpoint(&self, location: &str) -> &str {
        if location == CLOUD {
            &self.config.cloud.endpoint
        } else {
            &self.config.edge.endpoint
        }
    }

    fn healthy(&self, location: &str, snapshot: &HealthSnapshot, why: String) -> RouteDecision {
        RouteDecision {
            location: location.to_string(),
            endpoint: self.endpoint(location).to_string(),
            justification: why,
            latency: snapshot.latency,
            degraded: false,
        }
    }

    fn degraded(&self, location: &str, error: Option<String>) -> RouteDecision {
        if let Some(error) = error {
            debug!(location, error = %error, "routing degraded");
        }
        RouteDecision {
            location: location.to_string(),
            endpoint: self.endpoint(location).to_string(),
            justification: NO_HEALTHY_ENDPOINTS.to_string(),
            latency: None,
            degraded: true,
        }
    }

    fn record(&self, strategy: &str, decision: &RouteDecision) {
        crate::metrics::inc_route_decision(strategy, &decision.location);
        debug!(
            strategy,
            location = %decision.location,
            degraded = decision.degraded,
            justification = %decision.justification,
            "route decided"
        );
    }
}
