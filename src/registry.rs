//! # BackendRegistry — fleet membership and live load counters
//!
//! ## Responsibility
//! Track the known compute backends, their capability tags, and the
//! capacity/load counters the dispatcher relies on for placement.
//!
//! ## Guarantees
//! - Thread-safe: every method takes a short `parking_lot` lock and never
//!   holds it across an `.await` or any I/O
//! - Ordered: [`BackendRegistry::all`] returns backends in registration
//!   order, which routing uses as its tie-breaker
//! - Clamped: `current_load` never goes below zero
//! - Lenient: mutations addressed to an unknown id are silent no-ops
//!
//! ## NOT Responsible For
//! - Deciding reachability (see: `health`)
//! - Choosing a backend (see: `routing`)

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::BackendConfig;

/// Capability tag that matches every task type.
pub const UNIVERSAL_CAPABILITY: &str = "all";

/// A compute endpoint capable of executing tasks of certain types.
///
/// Values handed out by the registry are snapshots; mutate through the
/// registry instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backend {
    /// Stable backend identifier.
    pub id: String,
    /// Base URL of the backend.
    pub endpoint: String,
    /// Capability tags declared by the backend.
    pub capabilities: BTreeSet<String>,
    /// Tasks currently assigned to or running on this backend.
    pub current_load: u32,
    /// Maximum concurrent tasks. Immutable after registration.
    pub max_load: u32,
    /// Last reachability verdict from the health prober.
    pub is_online: bool,
    /// Time of the last successful probe.
    pub last_heartbeat: Option<DateTime<Utc>>,
}

impl Backend {
    /// Create an offline backend with zero load.
    ///
    /// Backends start offline until their first successful probe.
    pub fn new(
        id: impl Into<String>,
        endpoint: impl Into<String>,
        capabilities: impl IntoIterator<Item = impl Into<String>>,
        max_load: u32,
    ) -> Self {
        Self {
            id: id.into(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            capabilities: capabilities.into_iter().map(Into::into).collect(),
            current_load: 0,
            max_load,
            is_online: false,
            last_heartbeat: None,
        }
    }

    /// Online and below its concurrency limit.
    pub fn is_available(&self) -> bool {
        self.is_online && self.current_load < self.max_load
    }

    /// Returns `true` if this backend declares `capability` or the universal tag.
    pub fn serves(&self, capability: &str) -> bool {
        self.capabilities.contains(capability) || self.capabilities.contains(UNIVERSAL_CAPABILITY)
    }
}

impl From<&BackendConfig> for Backend {
    fn from(cfg: &BackendConfig) -> Self {
        Backend::new(
            cfg.id.clone(),
            cfg.endpoint.clone(),
            cfg.capabilities.iter().cloned(),
            cfg.max_load,
        )
    }
}

/// Registry of the backend fleet.
///
/// Mutated by exactly two actors, the dispatch path (load counters) and the
/// health loop (online flag, heartbeat); read by routing.
#[derive(Debug, Default)]
pub struct BackendRegistry {
    backends: RwLock<Vec<Backend>>,
}

impl BackendRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from configured backends, in file order.
    pub fn from_config(backends: &[BackendConfig]) -> Self {
        let registry = Self::new();
        for cfg in backends {
            registry.register(Backend::from(cfg));
        }
        registry
    }

    /// Register a backend.
    ///
    /// Returns `false` and leaves the existing entry untouched if a backend
    /// with the same id is already registered.
    pub fn register(&self, backend: Backend) -> bool {
        let mut backends = self.backends.write();
        if backends.iter().any(|b| b.id == backend.id) {
            warn!(backend = %backend.id, "backend already registered, ignoring");
            return false;
        }
        info!(
            backend = %backend.id,
            endpoint = %backend.endpoint,
            max_load = backend.max_load,
            "backend registered"
        );
        backends.push(backend);
        true
    }

    /// Snapshot of every backend in registration order.
    pub fn all(&self) -> Vec<Backend> {
        self.backends.read().clone()
    }

    /// Snapshot of one backend.
    pub fn get(&self, id: &str) -> Option<Backend> {
        self.backends.read().iter().find(|b| b.id == id).cloned()
    }

    /// Backends serving `capability`, in registration order.
    pub fn find_by_capability(&self, capability: &str) -> Vec<Backend> {
        self.backends
            .read()
            .iter()
            .filter(|b| b.serves(capability))
            .cloned()
            .collect()
    }

    /// Number of registered backends.
    pub fn len(&self) -> usize {
        self.backends.read().len()
    }

    /// Returns `true` when no backend is registered.
    pub fn is_empty(&self) -> bool {
        self.backends.read().is_empty()
    }

    /// Increment the load counter of `id`.
    pub fn increment_load(&self, id: &str) {
        self.with_backend(id, |b| {
            b.current_load = b.current_load.saturating_add(1);
            crate::metrics::set_backend_load(&b.id, b.current_load);
            debug!(backend = %b.id, load = b.current_load, "load incremented");
        });
    }

    /// Decrement the load counter of `id`, clamped at zero.
    pub fn decrement_load(&self, id: &str) {
        self.with_backend(id, |b| {
            b.current_load = b.current_load.saturating_sub(1);
            crate::metrics::set_backend_load(&b.id, b.current_load);
            debug!(backend = %b.id, load = b.current_load, "load decremented");
        });
    }

    /// Record the reachability verdict for `id`.
    pub fn set_online(&self, id: &str, online: bool) {
        self.with_backend(id, |b| {
            if b.is_online != online {
                info!(backend = %b.id, online, "backend reachability changed");
            }
            b.is_online = online;
        });
    }

    /// Record the time of the last successful probe for `id`.
    pub fn set_heartbeat(&self, id: &str, at: DateTime<Utc>) {
        self.with_backend(id, |b| b.last_heartbeat = Some(at));
    }

    fn with_backend(&self, id: &str, f: impl FnOnce(&mut Backend)) {
        let mut backends = self.backends.write();
        match backends.iter_mut().find(|b| b.id == id) {
            Some(backend) => f(backend),
            None => debug!(backend = %id, "mutation for unknown backend ignored"),
        }
    }
}
