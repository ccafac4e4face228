//! # ExecutionSupervisor — one attempt of one task
//!
//! ## Responsibility
//! Bind a task to a backend, run the backend call under the invocation
//! timeout, record the outcome, and apply the retry policy.
//!
//! ## Guarantees
//! - Balanced load: every increment is paired with exactly one decrement
//!   through [`LoadGuard`], on success, failure, cancellation, or drop
//! - Bounded: no attempt outlives the invocation timeout
//! - Release-then-requeue: a retried task is re-enqueued only after its
//!   backend slot is released
//!
//! ## NOT Responsible For
//! - Choosing the backend (see: `routing`)
//! - Queue ordering (see: queue.rs)

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::invoker::{BackendInvoker, ExecuteRequest, InvokeError};
use super::queue::DispatchQueue;
use super::store::{FailOutcome, TaskStore};
use crate::registry::{Backend, BackendRegistry};

/// Holds one unit of a backend's load; releases it on drop.
#[derive(Debug)]
#[must_use = "dropping the guard releases the backend slot"]
pub struct LoadGuard {
    registry: Arc<BackendRegistry>,
    backend_id: String,
}

impl LoadGuard {
    /// Increment `backend_id`'s load and return the guard that undoes it.
    pub fn acquire(registry: Arc<BackendRegistry>, backend_id: &str) -> Self {
        registry.increment_load(backend_id);
        Self {
            registry,
            backend_id: backend_id.to_string(),
        }
    }

    /// Backend this guard holds a slot on.
    pub fn backend_id(&self) -> &str {
        &self.backend_id
    }
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        self.registry.decrement_load(&self.backend_id);
    }
}

/// How a single attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The backend returned a result.
    Completed,
    /// The attempt failed and the task was re-enqueued.
    Retried,
    /// The attempt failed with no retries left.
    Failed,
    /// The task was cancelled between assignment and start.
    Cancelled,
}

/// Runs task attempts against backends.
pub struct ExecutionSupervisor {
    store: Arc<TaskStore>,
    queue: Arc<DispatchQueue>,
    registry: Arc<BackendRegistry>,
    invoker: Arc<dyn BackendInvoker>,
    invoke_timeout: Duration,
}

impl std::fmt::Debug for ExecutionSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionSupervisor")
            .field("invoke_timeout", &self.invoke_timeout)
            .finish()
    }
}

impl ExecutionSupervisor {
    /// Create a supervisor sharing the dispatch state.
    pub fn new(
        store: Arc<TaskStore>,
        queue: Arc<DispatchQueue>,
        registry: Arc<BackendRegistry>,
        invoker: Arc<dyn BackendInvoker>,
        invoke_timeout: Duration,
    ) -> Self {
        Self {
            store,
            queue,
            registry,
            invoker,
            invoke_timeout,
        }
    }

    /// `Pending → Assigned` on `backend` and take a load slot.
    ///
    /// Returns `None`, without touching the load, if the task is no longer
    /// `Pending` (e.g. it was cancelled while queued).
    pub fn assign(&self, task_id: &str, backend: &Backend) -> Option<LoadGuard> {
        if !self.store.mark_assigned(task_id, &backend.id) {
            return None;
        }
        debug!(task_id = %task_id, backend = %backend.id, "task assigned");
        Some(LoadGuard::acquire(Arc::clone(&self.registry), &backend.id))
    }

    /// Run one attempt of `task_id` on `backend`, consuming its load slot.
    pub async fn execute(
        &self,
        task_id: String,
        backend: Backend,
        guard: LoadGuard,
    ) -> AttemptOutcome {
        let requeue = {
            let _slot = guard;

            let Some(attempt) = self.store.begin(&task_id) else {
                info!(task_id = %task_id, "task cancelled before start");
                return AttemptOutcome::Cancelled;
            };
            crate::metrics::inc_task_event("started");
            info!(
                task_id = %task_id,
                backend = %backend.id,
                task_type = %attempt.task_type,
                "task started"
            );

            let request = ExecuteRequest {
                task_id: task_id.clone(),
                task_type: attempt.task_type,
                payload: attempt.payload,
            };
            let started = Instant::now();
            let result = tokio::time::timeout(
                self.invoke_timeout,
                self.invoker.invoke(&backend, &request),
            )
            .await
            .unwrap_or(Err(InvokeError::Timeout {
                after: self.invoke_timeout,
            }));
            let elapsed = started.elapsed();

            match result {
                Ok(value) => {
                    crate::metrics::record_invoke_latency("ok", elapsed);
                    self.store.complete(&task_id, value);
                    crate::metrics::inc_task_event("completed");
                    info!(
                        task_id = %task_id,
                        backend = %backend.id,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "task completed"
                    );
                    return AttemptOutcome::Completed;
                }
                Err(e) => {
                    crate::metrics::record_invoke_latency("error", elapsed);
                    let message = e.to_string();
                    match self.store.fail(&task_id, &message) {
                        Some(FailOutcome::Requeue(priority)) => {
                            warn!(
                                task_id = %task_id,
                                backend = %backend.id,
                                error = %message,
                                "attempt failed, retrying"
                            );
                            priority
                        }
                        _ => {
                            warn!(
                                task_id = %task_id,
                                backend = %backend.id,
                                error = %message,
                                "task failed"
                            );
                            crate::metrics::inc_task_event("failed");
                            return AttemptOutcome::Failed;
                        }
                    }
                }
            }
        };

        // slot released above
        crate::metrics::inc_task_event("retried");
        self.queue.push(requeue, task_id);
        AttemptOutcome::Retried
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::invoker::EchoInvoker;
    use crate::dispatch::task::{Priority, Task, TaskStatus};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FailingInvoker {
        calls: AtomicU32,
    }

    #[async_trait]
    impl BackendInvoker for FailingInvoker {
        async fn invoke(
            &self,
            _backend: &Backend,
            _request: &ExecuteRequest,
        ) -> Result<serde_json::Value, InvokeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(InvokeError::Status {
                status: 503,
                body: "down".into(),
            })
        }
    }

    /// Records the backend load observed during the call.
    struct LoadProbe {
        registry: Arc<BackendRegistry>,
        seen: AtomicU32,
    }

    #[async_trait]
    impl BackendInvoker for LoadProbe {
        async fn invoke(
            &self,
            backend: &Backend,
            _request: &ExecuteRequest,
        ) -> Result<serde_json::Value, InvokeError> {
            let load = self
                .registry
                .get(&backend.id)
                .map(|b| b.current_load)
                .unwrap_or_default();
            self.seen.store(load, Ordering::SeqCst);
            Ok(json!(null))
        }
    }

    struct Fixture {
        store: Arc<TaskStore>,
        queue: Arc<DispatchQueue>,
        registry: Arc<BackendRegistry>,
        backend: Backend,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(BackendRegistry::new());
        registry.register(Backend::new("a", "http://a", ["llm"], 1));
        registry.set_online("a", true);
        let backend = registry.get("a").expect("test: registered");
        Fixture {
            store: Arc::new(TaskStore::new()),
            queue: Arc::new(DispatchQueue::new()),
            registry,
            backend,
        }
    }

    fn supervisor(f: &Fixture, invoker: Arc<dyn BackendInvoker>, timeout: Duration) -> ExecutionSupervisor {
        ExecutionSupervisor::new(
            f.store.clone(),
            f.queue.clone(),
            f.registry.clone(),
            invoker,
            timeout,
        )
    }

    fn submit(f: &Fixture, max_retries: u32) -> String {
        let task = Task::new("llm", json!({"x": 1}), Priority::High, max_retries);
        let id = task.id.clone();
        f.store.insert(task);
        id
    }

    fn load(f: &Fixture) -> Option<u32> {
        f.registry.get("a").map(|b| b.current_load)
    }

    #[test]
    fn test_load_guard_releases_on_drop() {
        let f = fixture();
        let guard = LoadGuard::acquire(f.registry.clone(), "a");
        assert_eq!(guard.backend_id(), "a");
        assert_eq!(load(&f), Some(1));
        drop(guard);
        assert_eq!(load(&f), Some(0));
    }

    #[tokio::test]
    async fn test_success_completes_and_releases_load() {
        let f = fixture();
        let probe = Arc::new(LoadProbe {
            registry: f.registry.clone(),
            seen: AtomicU32::new(99),
        });
        let sup = supervisor(&f, probe.clone(), Duration::from_secs(1));
        let id = submit(&f, 3);

        let guard = sup.assign(&id, &f.backend).expect("test: assign");
        assert_eq!(f.store.status(&id), Some(TaskStatus::Assigned));
        let outcome = sup.execute(id.clone(), f.backend.clone(), guard).await;

        assert_eq!(outcome, AttemptOutcome::Completed);
        assert_eq!(probe.seen.load(Ordering::SeqCst), 1);
        assert_eq!(load(&f), Some(0));
        assert_eq!(f.store.status(&id), Some(TaskStatus::Completed));
    }

    #[tokio::test]
    async fn test_failure_with_retries_requeues_after_release() {
        let f = fixture();
        let invoker = Arc::new(FailingInvoker {
            calls: AtomicU32::new(0),
        });
        let sup = supervisor(&f, invoker, Duration::from_secs(1));
        let id = submit(&f, 1);

        let guard = sup.assign(&id, &f.backend).expect("test: assign");
        let outcome = sup.execute(id.clone(), f.backend.clone(), guard).await;
        assert_eq!(outcome, AttemptOutcome::Retried);
        assert_eq!(load(&f), Some(0));
        assert_eq!(f.queue.try_pop(), Some((Priority::High, id.clone())));

        let t = f.store.snapshot(&id).expect("test: snapshot");
        assert_eq!(t.status, TaskStatus::Pending);
        assert_eq!(t.retry_count, 1);
        assert!(t.assigned_backend.is_none());
    }

    #[tokio::test]
    async fn test_failure_without_retries_is_terminal() {
        let f = fixture();
        let invoker = Arc::new(FailingInvoker {
            calls: AtomicU32::new(0),
        });
        let sup = supervisor(&f, invoker.clone(), Duration::from_secs(1));
        let id = submit(&f, 0);

        let guard = sup.assign(&id, &f.backend).expect("test: assign");
        let outcome = sup.execute(id.clone(), f.backend.clone(), guard).await;
        assert_eq!(outcome, AttemptOutcome::Failed);
        assert_eq!(invoker.calls.load(Ordering::SeqCst), 1);
        assert!(f.queue.is_empty());
        assert_eq!(load(&f), Some(0));

        let t = f.store.snapshot(&id).expect("test: snapshot");
        assert_eq!(t.status, TaskStatus::Failed);
        assert!(t.error.as_deref().unwrap_or_default().contains("503"));
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let f = fixture();
        let slow = Arc::new(EchoInvoker::with_delay(Duration::from_secs(5)));
        let sup = supervisor(&f, slow, Duration::from_millis(50));
        let id = submit(&f, 0);

        let guard = sup.assign(&id, &f.backend).expect("test: assign");
        let outcome = sup.execute(id.clone(), f.backend.clone(), guard).await;
        assert_eq!(outcome, AttemptOutcome::Failed);
        let t = f.store.snapshot(&id).expect("test: snapshot");
        assert!(t.error.as_deref().unwrap_or_default().contains("timed out"));
        assert_eq!(load(&f), Some(0));
    }

    #[tokio::test]
    async fn test_cancel_between_assign_and_start_releases_load() {
        let f = fixture();
        let sup = supervisor(&f, Arc::new(EchoInvoker::default()), Duration::from_secs(1));
        let id = submit(&f, 3);

        let guard = sup.assign(&id, &f.backend).expect("test: assign");
        assert_eq!(load(&f), Some(1));
        assert!(f.store.cancel(&id));
        let outcome = sup.execute(id.clone(), f.backend.clone(), guard).await;
        assert_eq!(outcome, AttemptOutcome::Cancelled);
        assert_eq!(load(&f), Some(0));
        assert_eq!(f.store.status(&id), Some(TaskStatus::Cancelled));
    }

    #[tokio::test]
    async fn test_assign_refuses_non_pending_without_taking_load() {
        let f = fixture();
        let sup = supervisor(&f, Arc::new(EchoInvoker::default()), Duration::from_secs(1));
        let id = submit(&f, 3);
        f.store.cancel(&id);
        assert!(sup.assign(&id, &f.backend).is_none());
        assert_eq!(load(&f), Some(0));
    }
}
