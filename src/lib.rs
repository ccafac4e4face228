//! # fleet-dispatch
//!
//! Priority task dispatch and adaptive edge/cloud routing over a small,
//! health-probed fleet of compute backends.
//!
//! ## Architecture
//!
//! ```text
//! submit_task ──► DispatchQueue (priority, FIFO per band)
//!                      │
//!                 dispatch worker ──► capability routing ──► BackendRegistry
//!                      │
//!                 ExecutionSupervisor ──► POST {backend}/api/execute
//!                      │
//!                 retry / requeue / terminal state
//!
//! HealthProber loop ──► GET {backend}/health ──► BackendRegistry.is_online
//! route_request ──► RoutingPolicy (edge-first | cloud-first | balanced | off-grid)
//! ```
//!
//! Two long-running routines (the dispatch worker and the health loop) share
//! one piece of mutable state, the [`registry::BackendRegistry`].

// ── Lint policy ───────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![warn(missing_docs)]

use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub mod config;
pub mod dispatch;
pub mod health;
pub mod metrics;
pub mod registry;
pub mod routing;

#[cfg(feature = "web-api")]
pub mod web_api;

// Re-exports for convenience
pub use config::{DispatchConfig, LogFormat};
pub use dispatch::{
    BackendInvoker, Coordinator, CoordinatorStatus, HttpInvoker, Priority, TaskCounts,
    TaskSnapshot, TaskStatus,
};
pub use health::{HealthProber, HealthSnapshot};
pub use registry::{Backend, BackendRegistry};
pub use routing::{
    OperatingMode, RequestProfile, RouteDecision, RouteStrategy, RoutingPolicy, RoutingStats,
};

/// Initialise the global tracing subscriber.
///
/// The `LOG_FORMAT` environment variable, when set, overrides `format`:
/// - `"json"` — structured JSON output for log aggregators
/// - anything else — human-readable pretty output
///
/// Filter level is controlled by `RUST_LOG` (e.g. `RUST_LOG=fleet_dispatch=debug`).
///
/// # Errors
///
/// Returns [`DispatchError::Other`] if the global subscriber has already
/// been set (e.g. by a previous call or a test harness).
///
/// # Panics
///
/// This function never panics.
pub fn init_tracing(format: LogFormat) -> Result<(), DispatchError> {
    let format = match std::env::var("LOG_FORMAT").ok().as_deref() {
        Some("json") => LogFormat::Json,
        Some(_) => LogFormat::Pretty,
        None => format,
    };

    let result = match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .with_current_span(true)
            .with_span_list(true)
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init(),
    };

    result.map_err(|e| DispatchError::Other(format!("tracing init failed: {e}")))
}

/// Top-level errors raised while building or starting the dispatch core.
///
/// Runtime failures (backend errors, probe failures, missing capacity) never
/// surface here: they are absorbed into task state or route decisions.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Configuration could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    Config(#[from] config::validation::ConfigError),

    /// The outbound HTTP client could not be constructed.
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    /// Metrics registry initialisation failed.
    #[error("metrics error: {0}")]
    Metrics(String),

    /// Catch-all for errors that do not fit a specific variant.
    #[error("{0}")]
    Other(String),
}
