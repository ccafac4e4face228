//! # Dispatch — priority queue and execution supervision
//!
//! ## Architecture
//!
//! ```text
//! submit_task ──► TaskStore (Pending) ──► DispatchQueue
//!                                              │ pop (priority, FIFO)
//!                                              ▼
//!                          RoutingPolicy::select_backend
//!                              │ none ─► backoff ─► re-enqueue at tail
//!                              ▼
//!                   ExecutionSupervisor (LoadGuard, timeout)
//!                              │ fail + retries left ─► re-enqueue
//!                              ▼
//!                       Completed | Failed
//! ```
//!
//! ## Modules
//!
//! - [`task`] — Task record, Priority, TaskStatus
//! - [`store`] — guarded lifecycle transitions
//! - [`queue`] — unbounded priority queue of task ids
//! - [`invoker`] — backend call seam and its HTTP implementation
//! - [`supervisor`] — one attempt: load slot, timeout, retry policy
//! - [`coordinator`] — the public entry point and its two routines

pub mod coordinator;
pub mod invoker;
pub mod queue;
pub mod store;
pub mod supervisor;
pub mod task;

pub use coordinator::{Coordinator, CoordinatorStatus};
pub use invoker::{BackendInvoker, EchoInvoker, ExecuteRequest, HttpInvoker, InvokeError};
pub use queue::DispatchQueue;
pub use store::{TaskCounts, TaskStore};
pub use supervisor::{AttemptOutcome, ExecutionSupervisor, LoadGuard};
pub use task::{Priority, Task, TaskSnapshot, TaskStatus};
