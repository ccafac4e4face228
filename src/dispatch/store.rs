//! # TaskStore — authoritative task records
//!
//! ## Responsibility
//! Own every submitted [`Task`] and apply the lifecycle transitions. Each
//! transition checks the current status under the entry's lock, so the
//! queue worker, the supervisor, and external cancel requests never race
//! each other into an illegal state.
//!
//! ## Guarantees
//! - Guarded: a transition whose precondition fails leaves the task untouched
//! - Monotonic: apart from the retry loop, status only moves forward
//! - Bounded retries: a failure with `retry_count == max_retries` is terminal
//!
//! ## NOT Responsible For
//! - Queue ordering (see: queue.rs)
//! - Load counters (see: supervisor.rs)

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

use super::task::{Priority, Task, TaskStatus};

/// Number of tasks in each status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskCounts {
    /// Waiting in the queue.
    pub pending: usize,
    /// Bound to a backend, not yet started.
    pub assigned: usize,
    /// Backend invocation running.
    pub in_progress: usize,
    /// Finished with a result.
    pub completed: usize,
    /// Exhausted their retries.
    pub failed: usize,
    /// Cancelled before execution.
    pub cancelled: usize,
}

/// What the caller must do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Retries remain: the task is `Pending` again and must be re-enqueued.
    Requeue(Priority),
    /// Retry budget spent: the task is `Failed`.
    Terminal,
}

/// What a backend needs to run an attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempt {
    /// Task type tag.
    pub task_type: String,
    /// Opaque payload.
    pub payload: serde_json::Value,
}

/// Concurrent map of task id to task record.
#[derive(Debug, Default)]
pub struct TaskStore {
    tasks: DashMap<String, Task>,
}

impl TaskStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly submitted task.
    pub fn insert(&self, task: Task) {
        self.tasks.insert(task.id.clone(), task);
    }

    /// Copy of the task, or `None` for an unknown id.
    pub fn snapshot(&self, id: &str) -> Option<Task> {
        self.tasks.get(id).map(|t| t.clone())
    }

    /// Current status, or `None` for an unknown id.
    pub fn status(&self, id: &str) -> Option<TaskStatus> {
        self.tasks.get(id).map(|t| t.status)
    }

    /// `Pending | Assigned → Cancelled`. Returns `false` otherwise.
    pub fn cancel(&self, id: &str) -> bool {
        let Some(mut task) = self.tasks.get_mut(id) else {
            return false;
        };
        if !task.status.is_cancellable() {
            debug!(task_id = %id, status = %task.status, "cancel refused");
            return false;
        }
        task.status = TaskStatus::Cancelled;
        task.assigned_backend = None;
        task.completed_at = Some(Utc::now());
        true
    }

    /// `Pending → Assigned` on `backend`. Returns `false` otherwise.
    pub fn mark_assigned(&self, id: &str, backend: &str) -> bool {
        match self.tasks.get_mut(id) {
            Some(mut task) if task.status == TaskStatus::Pending => {
                task.status = TaskStatus::Assigned;
                task.assigned_backend = Some(backend.to_string());
                true
            }
            _ => false,
        }
    }

    /// `Assigned → InProgress`, stamping the start time.
    ///
    /// Returns `None` if the task was cancelled (or is otherwise not
    /// `Assigned`) in the meantime.
    pub fn begin(&self, id: &str) -> Option<Attempt> {
        let mut task = self.tasks.get_mut(id)?;
        if task.status != TaskStatus::Assigned {
            return None;
        }
        task.status = TaskStatus::InProgress;
        task.started_at = Some(Utc::now());
        Some(Attempt {
            task_type: task.task_type.clone(),
            payload: task.payload.clone(),
        })
    }

    /// `InProgress → Completed` with `result`.
    pub fn complete(&self, id: &str, result: serde_json::Value) -> bool {
        match self.tasks.get_mut(id) {
            Some(mut task) if task.status == TaskStatus::InProgress => {
                task.status = TaskStatus::Completed;
                task.result = Some(result);
                task.error = None;
                task.completed_at = Some(Utc::now());
                true
            }
            _ => false,
        }
    }

    /// Record a failed attempt of an `InProgress` task.
    ///
    /// With retries left the task goes back to `Pending` with its backend
    /// cleared; otherwise it becomes `Failed` carrying `error`. Returns
    /// `None` if the task is not `InProgress`.
    pub fn fail(&self, id: &str, error: &str) -> Option<FailOutcome> {
        let mut task = self.tasks.get_mut(id)?;
        if task.status != TaskStatus::InProgress {
            return None;
        }
        task.assigned_backend = None;
        if task.retry_count < task.max_retries {
            task.retry_count += 1;
            task.status = TaskStatus::Pending;
            Some(FailOutcome::Requeue(task.priority))
        } else {
            task.status = TaskStatus::Failed;
            task.error = Some(error.to_string());
            task.completed_at = Some(Utc::now());
            Some(FailOutcome::Terminal)
        }
    }

    /// Tally tasks by status.
    pub fn counts(&self) -> TaskCounts {
        let mut counts = TaskCounts::default();
        for task in self.tasks.iter() {
            match task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Assigned => counts.assigned += 1,
                TaskStatus::InProgress => counts.in_progress += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
                TaskStatus::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }

    /// Number of tasks ever submitted.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns `true` if nothing was ever submitted.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
