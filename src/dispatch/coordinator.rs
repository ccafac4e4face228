//! # Coordinator — the embeddable dispatch core
//!
//! ## Responsibility
//! Own one instance of every component (registry, prober, routing policy,
//! task store, queue, supervisor), expose the task and routing API to the
//! embedding process, and run the two long-lived routines: the queue worker
//! and the health loop.
//!
//! ## Guarantees
//! - Non-blocking submit: `submit_task` enqueues and returns the id at once
//! - Single consumer: exactly one worker drains the queue
//! - No busy-polling: the worker parks on the queue, the backoff timer, or
//!   the shutdown signal
//! - Graceful: `shutdown` stops both routines at their next suspension point
//!   and awaits in-flight executions
//!
//! ## NOT Responsible For
//! - Choosing backends (see: `routing`)
//! - Running an attempt (see: supervisor.rs)
//! - Serving HTTP (see: `web_api`)

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use super::invoker::{BackendInvoker, HttpInvoker};
use super::queue::DispatchQueue;
use super::store::{TaskCounts, TaskStore};
use super::supervisor::ExecutionSupervisor;
use super::task::{Priority, Task, TaskSnapshot, TaskStatus};
use crate::config::DispatchConfig;
use crate::health::HealthProber;
use crate::registry::{Backend, BackendRegistry};
use crate::routing::{OperatingMode, RequestProfile, RouteDecision, RoutingPolicy, RoutingStats};
use crate::DispatchError;

/// Snapshot returned by [`Coordinator::get_coordinator_status`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoordinatorStatus {
    /// Every backend, in registration order.
    pub backends: Vec<Backend>,
    /// Tasks by status.
    pub task_counts: TaskCounts,
    /// Entries waiting in the queue.
    pub queue_size: usize,
}

/// Shared handles the queue worker runs with.
#[derive(Clone)]
struct WorkerContext {
    store: Arc<TaskStore>,
    queue: Arc<DispatchQueue>,
    router: Arc<RoutingPolicy>,
    supervisor: Arc<ExecutionSupervisor>,
    backoff: Duration,
}

/// Task dispatch and adaptive routing core.
///
/// Construct once per process (or per test) and share by reference or `Arc`.
///
/// # Example
///
/// ```rust,no_run
/// use fleet_dispatch::{Coordinator, DispatchConfig, Priority};
///
/// # async fn example() -> Result<(), fleet_dispatch::DispatchError> {
/// let coordinator = Coordinator::new(&DispatchConfig::default())?;
/// coordinator.start();
/// let id = coordinator.submit_task("llm", serde_json::json!({"prompt": "hi"}), Priority::High);
/// println!("{:?}", coordinator.get_task_status(&id));
/// coordinator.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct Coordinator {
    config: DispatchConfig,
    registry: Arc<BackendRegistry>,
    prober: Arc<HealthProber>,
    router: Arc<RoutingPolicy>,
    store: Arc<TaskStore>,
    queue: Arc<DispatchQueue>,
    supervisor: Arc<ExecutionSupervisor>,
    shutdown_tx: watch::Sender<bool>,
    worker_started: AtomicBool,
    health_started: AtomicBool,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("backends", &self.registry.len())
            .field("tasks", &self.store.len())
            .field("queue_size", &self.queue.len())
            .finish()
    }
}

impl Coordinator {
    /// Build a coordinator that invokes backends over HTTP.
    ///
    /// Backends listed in `config` are registered in file order, offline
    /// until first probed.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Http`] if the probe client cannot be built.
    pub fn new(config: &DispatchConfig) -> Result<Self, DispatchError> {
        Self::with_invoker(config, Arc::new(HttpInvoker::new()))
    }

    /// Build a coordinator with a custom backend invoker.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Http`] if the probe client cannot be built.
    pub fn with_invoker(
        config: &DispatchConfig,
        invoker: Arc<dyn BackendInvoker>,
    ) -> Result<Self, DispatchError> {
        let registry = Arc::new(BackendRegistry::from_config(&config.backends));
        let prober = Arc::new(HealthProber::new(config.health.clone(), registry.clone())?);
        let router = Arc::new(RoutingPolicy::new(
            config.routing.clone(),
            registry.clone(),
            prober.clone(),
        ));
        let store = Arc::new(TaskStore::new());
        let queue = Arc::new(DispatchQueue::new());
        let supervisor = Arc::new(ExecutionSupervisor::new(
            store.clone(),
            queue.clone(),
            registry.clone(),
            invoker,
            config.coordinator.invoke_timeout(),
        ));
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config: config.clone(),
            registry,
            prober,
            router,
            store,
            queue,
            supervisor,
            shutdown_tx,
            worker_started: AtomicBool::new(false),
            health_started: AtomicBool::new(false),
            handles: Mutex::new(Vec::new()),
        })
    }

    /// Backend registry.
    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    /// Health prober.
    pub fn prober(&self) -> &Arc<HealthProber> {
        &self.prober
    }

    /// Routing policy.
    pub fn router(&self) -> &Arc<RoutingPolicy> {
        &self.router
    }

    /// Register a backend at runtime. Returns `false` for a duplicate id.
    pub fn register_backend(&self, backend: Backend) -> bool {
        self.registry.register(backend)
    }

    // ── Task API ─────────────────────────────────────────────────────────

    /// Enqueue a new `Pending` task and return its id.
    pub fn submit_task(
        &self,
        task_type: impl Into<String>,
        payload: serde_json::Value,
        priority: Priority,
    ) -> String {
        let task = Task::new(task_type, payload, priority, self.config.coordinator.max_retries);
        let id = task.id.clone();
        info!(task_id = %id, task_type = %task.task_type, ?priority, "task submitted");
        self.store.insert(task);
        self.queue.push(priority, id.clone());
        crate::metrics::inc_task_event("submitted");
        id
    }

    /// Snapshot of a task, or `None` for an unknown id.
    pub fn get_task_status(&self, task_id: &str) -> Option<TaskSnapshot> {
        self.store.snapshot(task_id)
    }

    /// Cancel a `Pending` or `Assigned` task.
    ///
    /// Returns `false`, leaving the task untouched, once it is `InProgress`
    /// or terminal, and for unknown ids. A running backend call is never
    /// interrupted.
    pub fn cancel_task(&self, task_id: &str) -> bool {
        let cancelled = self.store.cancel(task_id);
        if cancelled {
            info!(task_id = %task_id, "task cancelled");
            crate::metrics::inc_task_event("cancelled");
        }
        cancelled
    }

    /// Fleet, task, and queue overview.
    pub fn get_coordinator_status(&self) -> CoordinatorStatus {
        CoordinatorStatus {
            backends: self.registry.all(),
            task_counts: self.store.counts(),
            queue_size: self.queue.len(),
        }
    }

    // ── Routing API ──────────────────────────────────────────────────────

    /// Decide where an outbound request goes. Never fails.
    pub async fn route_request(&self, profile: &RequestProfile, mode: OperatingMode) -> RouteDecision {
        self.router.route_request(profile, mode).await
    }

    /// Routing configuration and last known endpoint health.
    pub fn get_routing_stats(&self) -> RoutingStats {
        self.router.stats()
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Start the queue worker and the health loop.
    ///
    /// Must be called from within a tokio runtime. Calling it again is a
    /// no-op.
    pub fn start(&self) {
        self.start_health_loop();
        self.start_worker();
    }

    /// Start only the queue worker.
    ///
    /// Backends then stay in whatever online state they are put in, which
    /// suits embedders that drive reachability themselves.
    pub fn start_worker(&self) {
        if self.worker_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let ctx = WorkerContext {
            store: self.store.clone(),
            queue: self.queue.clone(),
            router: self.router.clone(),
            supervisor: self.supervisor.clone(),
            backoff: self.config.coordinator.requeue_backoff(),
        };
        let handle = tokio::spawn(run_worker(ctx, self.shutdown_tx.subscribe()));
        self.handles.lock().push(handle);
    }

    /// Start only the health loop.
    pub fn start_health_loop(&self) {
        if self.health_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let handle = self
            .prober
            .spawn_loop(self.config.health.interval(), self.shutdown_tx.subscribe());
        self.handles.lock().push(handle);
    }

    /// Stop both routines and wait for them, in-flight executions included.
    ///
    /// Queued tasks stay `Pending`. The coordinator cannot be restarted.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "dispatch routine ended abnormally");
            }
        }
        info!(pending = self.queue.len(), "coordinator stopped");
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}

/// Queue worker: pop, route, assign, spawn the attempt; repeat.
async fn run_worker(ctx: WorkerContext, mut shutdown: watch::Receiver<bool>) {
    let mut in_flight = JoinSet::new();
    info!("dispatch worker started");

    loop {
        while in_flight.try_join_next().is_some() {}
        if *shutdown.borrow() {
            break;
        }

        let (priority, task_id) = tokio::select! {
            item = ctx.queue.pop() => item,
            _ = shutdown.changed() => break,
        };

        let Some(task) = ctx.store.snapshot(&task_id) else {
            continue;
        };
        if task.status != TaskStatus::Pending {
            debug!(task_id = %task_id, status = %task.status, "dropping stale queue entry");
            continue;
        }

        match ctx.router.select_backend(&task.task_type) {
            Ok(backend) => {
                let Some(guard) = ctx.supervisor.assign(&task_id, &backend) else {
                    continue;
                };
                let supervisor = ctx.supervisor.clone();
                in_flight.spawn(async move {
                    supervisor.execute(task_id, backend, guard).await;
                });
            }
            Err(e) => {
                debug!(
                    task_id = %task_id,
                    error = %e,
                    backoff_ms = ctx.backoff.as_millis() as u64,
                    "no capacity, backing off"
                );
                crate::metrics::inc_task_event("requeued");
                let stop = tokio::select! {
                    _ = tokio::time::sleep(ctx.backoff) => false,
                    _ = shutdown.changed() => true,
                };
                ctx.queue.push(priority, task_id);
                if stop {
                    break;
                }
            }
        }
    }

    let draining = in_flight.len();
    if draining > 0 {
        info!(in_flight = draining, "awaiting in-flight executions");
    }
    while in_flight.join_next().await.is_some() {}
    info!("dispatch worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::invoker::EchoInvoker;
    use serde_json::json;

    fn coordinator(backoff_ms: u64) -> Coordinator {
        let mut config = DispatchConfig::default();
        config.coordinator.requeue_backoff_ms = backoff_ms;
        Coordinator::with_invoker(&config, Arc::new(EchoInvoker::default()))
            .expect("test: build coordinator")
    }

    async fn wait_for(c: &Coordinator, id: &str, wanted: TaskStatus) -> TaskSnapshot {
        for _ in 0..200 {
            if let Some(t) = c.get_task_status(id) {
                if t.status == wanted {
                    return t;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {id} never reached {wanted}");
    }

    #[test]
    fn test_submit_is_immediately_resolvable() {
        let c = coordinator(10);
        let id = c.submit_task("llm", json!({"a": 1}), Priority::Normal);
        let t = c.get_task_status(&id).expect("test: resolvable");
        assert_eq!(t.status, TaskStatus::Pending);
        assert_eq!(t.max_retries, 3);
        assert_eq!(c.get_coordinator_status().queue_size, 1);
    }

    #[test]
    fn test_unknown_task_is_not_found() {
        let c = coordinator(10);
        assert!(c.get_task_status("missing").is_none());
        assert!(!c.cancel_task("missing"));
    }

    #[test]
    fn test_register_backend_rejects_duplicates() {
        let c = coordinator(10);
        assert!(c.register_backend(Backend::new("a", "http://a", ["llm"], 1)));
        assert!(!c.register_backend(Backend::new("a", "http://b", ["llm"], 1)));
        assert_eq!(c.get_coordinator_status().backends.len(), 1);
    }

    #[tokio::test]
    async fn test_worker_completes_task_on_online_backend() {
        let c = coordinator(10);
        c.register_backend(Backend::new("a", "http://a", ["llm"], 1));
        c.registry().set_online("a", true);
        c.start_worker();

        let id = c.submit_task("llm", json!({"x": 1}), Priority::High);
        let t = wait_for(&c, &id, TaskStatus::Completed).await;
        assert_eq!(t.result.as_ref().map(|r| r["echo"].clone()), Some(json!({"x": 1})));
        assert_eq!(c.registry().get("a").map(|b| b.current_load), Some(0));
        c.shutdown().await;
    }

    #[tokio::test]
    async fn test_no_capacity_keeps_task_pending_until_backend_appears() {
        let c = coordinator(10);
        c.start_worker();
        let id = c.submit_task("vision", json!({}), Priority::Normal);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(c.get_task_status(&id).map(|t| t.status), Some(TaskStatus::Pending));

        c.register_backend(Backend::new("v", "http://v", ["vision"], 1));
        c.registry().set_online("v", true);
        wait_for(&c, &id, TaskStatus::Completed).await;
        c.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancelled_queued_task_is_never_executed() {
        let c = coordinator(10);
        c.register_backend(Backend::new("a", "http://a", ["llm"], 1));
        c.registry().set_online("a", true);
        let id = c.submit_task("llm", json!({}), Priority::Normal);
        assert!(c.cancel_task(&id));
        c.start_worker();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let t = c.get_task_status(&id).expect("test: exists");
        assert_eq!(t.status, TaskStatus::Cancelled);
        assert!(t.started_at.is_none());
        assert_eq!(c.get_coordinator_status().queue_size, 0);
        c.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_is_prompt_while_backing_off() {
        let c = coordinator(60_000);
        c.start();
        c.submit_task("llm", json!({}), Priority::Normal);
        tokio::time::sleep(Duration::from_millis(20)).await;
        tokio::time::timeout(Duration::from_secs(2), c.shutdown())
            .await
            .expect("test: shutdown must not wait for the backoff");
        assert_eq!(c.get_coordinator_status().task_counts.pending, 1);
    }
}
