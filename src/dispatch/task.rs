//! # Task — dispatch work unit
//!
//! ## Responsibility
//! Define the Task record, its priority ordering, and the status state
//! machine shared by the queue worker and the execution supervisor.
//!
//! ## Guarantees
//! - Ordered: `Low < Normal < High < Urgent`
//! - Exclusive outcome: `result` and `error` are never both set
//! - Serializable: snapshots render directly as JSON for callers
//!
//! ## NOT Responsible For
//! - Enforcing transitions (see: store.rs)
//! - Ordering within a priority band (see: queue.rs)

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Task priority levels.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Background work.
    Low = 0,
    /// Standard priority for most tasks.
    #[default]
    Normal = 1,
    /// Processed before `Normal`.
    High = 2,
    /// Processed ahead of everything still queued.
    Urgent = 3,
}

impl Priority {
    /// Parse a priority level from a name string (`"low"`, `"normal"`, `"high"`, `"urgent"`).
    ///
    /// Returns `None` for unrecognised strings.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Priority::Low),
            "normal" => Some(Priority::Normal),
            "high" => Some(Priority::High),
            "urgent" => Some(Priority::Urgent),
            _ => None,
        }
    }
}

/// Status of a task in its lifecycle.
///
/// Tasks progress: `Pending` → `Assigned` → `InProgress` → `Completed` | `Failed`.
/// `Pending` and `Assigned` may be cancelled. A failed attempt with retries
/// left returns the task to `Pending`.
///
/// # Panics
///
/// No methods on this type panic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting in the queue.
    Pending,
    /// Bound to a backend, not yet started.
    Assigned,
    /// Backend invocation running.
    InProgress,
    /// Finished with a result.
    Completed,
    /// Exhausted its retries.
    Failed,
    /// Cancelled before execution started.
    Cancelled,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Assigned => write!(f, "assigned"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl TaskStatus {
    /// Returns `true` if no further transition can happen.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns `true` if an external cancel request is honoured.
    pub fn is_cancellable(&self) -> bool {
        matches!(self, Self::Pending | Self::Assigned)
    }
}

/// A unit of submitted work.
///
/// # Example
///
/// ```rust
/// use fleet_dispatch::dispatch::{Priority, Task, TaskStatus};
/// let task = Task::new("llm", serde_json::json!({"prompt": "hi"}), Priority::High, 3);
/// assert_eq!(task.status, TaskStatus::Pending);
/// assert_eq!(task.retry_count, 0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    /// Generated unique identifier.
    pub id: String,
    /// Type tag, matched against backend capabilities.
    #[serde(rename = "type")]
    pub task_type: String,
    /// Opaque payload forwarded to the backend.
    pub payload: serde_json::Value,
    /// Queue priority.
    pub priority: Priority,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Backend the task is bound to while `Assigned` / `InProgress`.
    pub assigned_backend: Option<String>,
    /// Backend response body, set on `Completed`.
    pub result: Option<serde_json::Value>,
    /// Last error message, set on `Failed`.
    pub error: Option<String>,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// Start of the latest attempt.
    pub started_at: Option<DateTime<Utc>>,
    /// Time the task reached `Completed` or `Failed`.
    pub completed_at: Option<DateTime<Utc>>,
    /// Failed attempts that were retried.
    pub retry_count: u32,
    /// Retry budget, fixed at submission.
    pub max_retries: u32,
}

/// Read-only copy of a [`Task`] handed to callers.
pub type TaskSnapshot = Task;

impl Task {
    /// Create a pending task with a fresh v4 UUID.
    pub fn new(
        task_type: impl Into<String>,
        payload: serde_json::Value,
        priority: Priority,
        max_retries: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task_type: task_type.into(),
            payload,
            priority,
            status: TaskStatus::Pending,
            assigned_backend: None,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            retry_count: 0,
            max_retries,
        }
    }
}
