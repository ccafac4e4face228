//! Prometheus metrics for the dispatch core.
//!
//! ## Usage
//!
//! Call [`init_metrics`] once at process startup. The helper functions
//! (`inc_task_event`, `inc_route_decision`, …) are no-ops if `init_metrics`
//! was never called, so the core is always safe to run and observability
//! simply degrades.
//!
//! ## Metrics Exposed
//!
//! | Name | Type | Labels |
//! |------|------|--------|
//! | `fleet_dispatch_task_events_total` | Counter | `event` |
//! | `fleet_dispatch_route_decisions_total` | Counter | `strategy`, `location` |
//! | `fleet_dispatch_probes_total` | Counter | `outcome` |
//! | `fleet_dispatch_invoke_duration_seconds` | Histogram | `outcome` |
//! | `fleet_dispatch_queue_depth` | Gauge | — |
//! | `fleet_dispatch_backend_load` | Gauge | `backend` |

use std::sync::OnceLock;
use std::time::Duration;

use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};

use crate::DispatchError;

/// All Prometheus metrics for the dispatch core, stored in one [`OnceLock`].
pub struct Metrics {
    /// Registry that owns all metric descriptors.
    pub registry: Registry,
    /// Task lifecycle events (submitted, completed, failed, retried, …).
    pub task_events: CounterVec,
    /// Route decisions by strategy and chosen location.
    pub route_decisions: CounterVec,
    /// Health probe outcomes.
    pub probes: CounterVec,
    /// Backend invocation latency.
    pub invoke_duration: HistogramVec,
    /// Tasks waiting in the dispatch queue.
    pub queue_depth: IntGauge,
    /// Current load per backend.
    pub backend_load: IntGaugeVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

fn init_err(e: prometheus::Error) -> DispatchError {
    DispatchError::Metrics(format!("metrics init failed: {e}"))
}

fn build() -> Result<Metrics, DispatchError> {
    let registry = Registry::new();

    let task_events = CounterVec::new(
        Opts::new("fleet_dispatch_task_events_total", "Task lifecycle events"),
        &["event"],
    )
    .map_err(init_err)?;
    registry
        .register(Box::new(task_events.clone()))
        .map_err(init_err)?;

    let route_decisions = CounterVec::new(
        Opts::new(
            "fleet_dispatch_route_decisions_total",
            "Routing decisions by strategy and location",
        ),
        &["strategy", "location"],
    )
    .map_err(init_err)?;
    registry
        .register(Box::new(route_decisions.clone()))
        .map_err(init_err)?;

    let probes = CounterVec::new(
        Opts::new("fleet_dispatch_probes_total", "Health probe outcomes"),
        &["outcome"],
    )
    .map_err(init_err)?;
    registry.register(Box::new(probes.clone())).map_err(init_err)?;

    let invoke_duration = HistogramVec::new(
        HistogramOpts::new(
            "fleet_dispatch_invoke_duration_seconds",
            "Backend invocation latency",
        ),
        &["outcome"],
    )
    .map_err(init_err)?;
    registry
        .register(Box::new(invoke_duration.clone()))
        .map_err(init_err)?;

    let queue_depth = IntGauge::new("fleet_dispatch_queue_depth", "Tasks waiting in the queue")
        .map_err(init_err)?;
    registry
        .register(Box::new(queue_depth.clone()))
        .map_err(init_err)?;

    let backend_load = IntGaugeVec::new(
        Opts::new("fleet_dispatch_backend_load", "In-flight tasks per backend"),
        &["backend"],
    )
    .map_err(init_err)?;
    registry
        .register(Box::new(backend_load.clone()))
        .map_err(init_err)?;

    Ok(Metrics {
        registry,
        task_events,
        route_decisions,
        probes,
        invoke_duration,
        queue_depth,
        backend_load,
    })
}

/// Initialise all metrics and register them with a private registry.
///
/// Calling it a second time is a no-op.
///
/// # Errors
///
/// Returns [`DispatchError::Metrics`] if metric construction or registration
/// fails.
pub fn init_metrics() -> Result<(), DispatchError> {
    if METRICS.get().is_some() {
        return Ok(());
    }
    // If another thread raced us the first one wins; both bundles are identical.
    let _ = METRICS.set(build()?);
    Ok(())
}

fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

/// Count a task lifecycle event (`submitted`, `completed`, `failed`, …).
pub fn inc_task_event(event: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.task_events.get_metric_with_label_values(&[event]) {
            c.inc();
        }
    }
}

/// Count a routing decision.
pub fn inc_route_decision(strategy: &str, location: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m
            .route_decisions
            .get_metric_with_label_values(&[strategy, location])
        {
            c.inc();
        }
    }
}

/// Count a health probe outcome (`reachable` / `unreachable`).
pub fn inc_probe(outcome: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.probes.get_metric_with_label_values(&[outcome]) {
            c.inc();
        }
    }
}

/// Record backend invocation latency.
pub fn record_invoke_latency(outcome: &str, d: Duration) {
    if let Some(m) = metrics() {
        if let Ok(h) = m.invoke_duration.get_metric_with_label_values(&[outcome]) {
            h.observe(d.as_secs_f64());
        }
    }
}

/// Set the queue depth gauge.
pub fn set_queue_depth(depth: usize) {
    if let Some(m) = metrics() {
        m.queue_depth.set(i64::try_from(depth).unwrap_or(i64::MAX));
    }
}

/// Set the load gauge for one backend.
pub fn set_backend_load(backend: &str, load: u32) {
    if let Some(m) = metrics() {
        if let Ok(g) = m.backend_load.get_metric_with_label_values(&[backend]) {
            g.set(i64::from(load));
        }
    }
}

/// Encode all metrics in the Prometheus text exposition format.
///
/// Returns an empty string if metrics are not initialised or encoding fails.
pub fn gather_metrics() -> String {
    let Some(m) = metrics() else {
        return String::new();
    };
    let families = m.registry.gather();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
