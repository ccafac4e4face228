//! # HealthProber — backend reachability and latency
//!
//! ## Responsibility
//! Probe `GET {endpoint}{path}` for every registered backend (periodically
//! and on demand), measure round-trip latency, and write the verdict back
//! into the [`BackendRegistry`]. The same prober serves the routing policy's
//! location probes through a separate TTL.
//!
//! ## Guarantees
//! - Bounded: every probe, body read included, is capped by the probe timeout
//! - Non-propagating: timeouts, connection errors and non-2xx statuses are
//!   folded into an unreachable [`HealthSnapshot`], never returned as errors
//! - Sole writer of `is_online`: nothing else flips a backend online
//! - Cached: snapshots are reused within their TTL to bound probe overhead
//!
//! ## NOT Responsible For
//! - Load accounting (see: `dispatch::supervisor`)
//! - Choosing between endpoints (see: `routing`)

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use serde::Deserialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::config::HealthConfig;
use crate::registry::{Backend, BackendRegistry};
use crate::DispatchError;

/// Best-effort record of one endpoint's reachability.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthSnapshot {
    /// Whether the last probe got a 2xx response in time.
    pub reachable: bool,
    /// Round-trip latency, present only when reachable.
    pub latency: Option<Duration>,
    /// When the probe completed.
    pub last_checked: DateTime<Utc>,
    /// `current_load` as reported by the endpoint itself, if any.
    pub reported_load: Option<u32>,
    /// Why the probe failed, when it did.
    pub error: Option<String>,
}

impl HealthSnapshot {
    fn reachable(latency: Duration, reported_load: Option<u32>) -> Self {
        Self {
            reachable: true,
            latency: Some(latency),
            last_checked: Utc::now(),
            reported_load,
            error: None,
        }
    }

    fn unreachable(error: String) -> Self {
        Self {
            reachable: false,
            latency: None,
            last_checked: Utc::now(),
            reported_load: None,
            error: Some(error),
        }
    }

    /// Latency in fractional milliseconds.
    pub fn latency_ms(&self) -> Option<f64> {
        self.latency.map(|d| d.as_secs_f64() * 1000.0)
    }
}

/// Optional body of a health response.
#[derive(Debug, Deserialize)]
struct HealthBody {
    #[serde(default)]
    current_load: Option<u32>,
}

#[derive(Debug, Clone)]
struct CachedProbe {
    snapshot: HealthSnapshot,
    taken_at: Instant,
}

/// Probes backends and routing locations over HTTP.
#[derive(Debug)]
pub struct HealthProber {
    client: reqwest::Client,
    config: HealthConfig,
    registry: Arc<BackendRegistry>,
    cache: DashMap<String, CachedProbe>,
}

impl HealthProber {
    /// Create a prober writing its verdicts into `registry`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Http`] if the HTTP client cannot be built.
    pub fn new(config: HealthConfig, registry: Arc<BackendRegistry>) -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.probe_timeout())
            .timeout(config.probe_timeout())
            .build()?;
        Ok(Self {
            client,
            config,
            registry,
            cache: DashMap::new(),
        })
    }

    /// Probe settings in effect.
    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Probe `endpoint` once, without touching the registry or the cache.
    pub async fn probe(&self, endpoint: &str) -> HealthSnapshot {
        let url = format!("{}{}", endpoint.trim_end_matches('/'), self.config.path);
        let started = Instant::now();

        let attempt = async {
            let resp = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| format!("connect: {e}"))?;
            if !resp.status().is_success() {
                return Err(format!("HTTP {}", resp.status().as_u16()));
            }
            let latency = started.elapsed();
            let reported_load = resp
                .json::<HealthBody>()
                .await
                .ok()
                .and_then(|b| b.current_load);
            Ok::<_, String>((latency, reported_load))
        };

        let snapshot = match tokio::time::timeout(self.config.probe_timeout(), attempt).await {
            Ok(Ok((latency, reported_load))) => HealthSnapshot::reachable(latency, reported_load),
            Ok(Err(e)) => HealthSnapshot::unreachable(e),
            Err(_) => HealthSnapshot::unreachable(format!(
                "timeout after {}ms",
                self.config.probe_timeout_ms
            )),
        };

        if snapshot.reachable {
            crate::metrics::inc_probe("reachable");
            trace!(url = %url, latency_ms = ?snapshot.latency_ms(), "probe ok");
        } else {
            crate::metrics::inc_probe("unreachable");
            debug!(url = %url, error = ?snapshot.error, "probe failed");
        }
        snapshot
    }

    /// Probe one backend and write the verdict into the registry.
    pub async fn check_one(&self, backend: &Backend) -> HealthSnapshot {
        let snapshot = self.probe(&backend.endpoint).await;
        self.registry.set_online(&backend.id, snapshot.reachable);
        if snapshot.reachable {
            self.registry.set_heartbeat(&backend.id, snapshot.last_checked);
        }
        self.store(&backend.id, snapshot.clone());
        snapshot
    }

    /// Like [`check_one`](Self::check_one), but served from cache within the
    /// backend cache TTL.
    pub async fn check_cached(&self, backend: &Backend) -> HealthSnapshot {
        if let Some(hit) = self.fresh(&backend.id, self.config.cache_ttl()) {
            return hit;
        }
        self.check_one(backend).await
    }

    /// Probe every registered backend concurrently.
    pub async fn check_all(&self) -> Vec<(String, HealthSnapshot)> {
        let backends = self.registry.all();
        let probes = backends.iter().map(|b| async move {
            let snapshot = self.check_one(b).await;
            (b.id.clone(), snapshot)
        });
        join_all(probes).await
    }

    /// Probe a routing location, reusing a cached snapshot younger than `ttl`.
    ///
    /// `ttl = None` forces a fresh probe. Never touches the registry.
    pub async fn probe_location(
        &self,
        key: &str,
        endpoint: &str,
        ttl: Option<Duration>,
    ) -> HealthSnapshot {
        if let Some(hit) = ttl.and_then(|ttl| self.fresh(key, ttl)) {
            return hit;
        }
        let snapshot = self.probe(endpoint).await;
        self.store(key, snapshot.clone());
        snapshot
    }

    /// Last snapshot stored under `key`, regardless of age.
    pub fn cached(&self, key: &str) -> Option<HealthSnapshot> {
        self.cache.get(key).map(|c| c.snapshot.clone())
    }

    fn fresh(&self, key: &str, ttl: Duration) -> Option<HealthSnapshot> {
        self.cache
            .get(key)
            .filter(|c| c.taken_at.elapsed() < ttl)
            .map(|c| c.snapshot.clone())
    }

    fn store(&self, key: &str, snapshot: HealthSnapshot) {
        self.cache.insert(
            key.to_string(),
            CachedProbe {
                snapshot,
                taken_at: Instant::now(),
            },
        );
    }

    /// Sweep the fleet every `interval` until `shutdown` flips to `true`.
    ///
    /// The first sweep runs immediately. Cancellation takes effect at the
    /// next suspension point; an in-progress sweep is awaited to completion.
    pub async fn run_loop(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(interval_ms = interval.as_millis() as u64, "health loop started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    let results = self.check_all().await;
                    let online = results.iter().filter(|(_, s)| s.reachable).count();
                    debug!(online, total = results.len(), "health sweep complete");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("health loop stopped");
    }

    /// Spawn [`run_loop`](Self::run_loop) on the runtime.
    pub fn spawn_loop(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let prober = Arc::clone(self);
        tokio::spawn(async move { prober.run_loop(interval, shutdown).await })
    }
}
