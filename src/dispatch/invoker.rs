//! Backend invocation.
//!
//! [`BackendInvoker`] is the seam between the supervisor and the network.
//! [`HttpInvoker`] speaks the backend protocol (`POST {endpoint}/api/execute`
//! with `{task_id, type, payload}`); [`EchoInvoker`] answers locally for
//! smoke tests and benchmarks.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::registry::Backend;

/// Path appended to a backend endpoint for task execution.
pub const EXECUTE_PATH: &str = "/api/execute";

/// Envelope sent to a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    /// Task identifier.
    pub task_id: String,
    /// Task type tag.
    #[serde(rename = "type")]
    pub task_type: String,
    /// Opaque payload.
    pub payload: serde_json::Value,
}

/// A failed invocation. Every variant is transient and subject to retry.
#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    /// Connection or request-level failure.
    #[error("transport error: {0}")]
    Transport(String),
    /// Backend answered with a non-2xx status.
    #[error("backend returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly empty.
        body: String,
    },
    /// Success status but the body was not JSON.
    #[error("invalid response body: {0}")]
    Decode(String),
    /// No answer within the invocation timeout.
    #[error("timed out after {}ms", after.as_millis())]
    Timeout {
        /// Timeout that elapsed.
        after: Duration,
    },
}

/// Executes one attempt of a task on a backend.
///
/// Implementations must be thread-safe (Send + Sync) for use across tasks.
/// The trait is object-safe to allow dynamic dispatch via `Arc<dyn BackendInvoker>`.
#[async_trait]
pub trait BackendInvoker: Send + Sync {
    /// Run `request` on `backend` and return its JSON result.
    ///
    /// The caller bounds the call with the invocation timeout.
    async fn invoke(
        &self,
        backend: &Backend,
        request: &ExecuteRequest,
    ) -> Result<serde_json::Value, InvokeError>;
}

// ============================================================================
// HTTP Invoker
// ============================================================================

/// Invoker for backends speaking the HTTP execute protocol.
#[derive(Debug, Clone, Default)]
pub struct HttpInvoker {
    client: reqwest::Client,
}

impl HttpInvoker {
    /// Create an invoker with a default client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an invoker sharing an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BackendInvoker for HttpInvoker {
    async fn invoke(
        &self,
        backend: &Backend,
        request: &ExecuteRequest,
    ) -> Result<serde_json::Value, InvokeError> {
        let url = format!("{}{}", backend.endpoint, EXECUTE_PATH);
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| InvokeError::Transport(format!("{url}: {e}")))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(InvokeError::Status { status, body });
        }

        response
            .json()
            .await
            .map_err(|e| InvokeError::Decode(e.to_string()))
    }
}

// ============================================================================
// Echo Invoker (Testing)
// ============================================================================

/// Local invoker that echoes the request back after a delay.
///
/// Useful for smoke tests and benchmarks without real backends.
#[derive(Debug, Clone, Default)]
pub struct EchoInvoker {
    /// Simulated execution delay.
    pub delay: Duration,
}

impl EchoInvoker {
    /// Echo after `delay`.
    pub fn with_delay(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl BackendInvoker for EchoInvoker {
    async fn invoke(
        &self,
        backend: &Backend,
        request: &ExecuteRequest,
    ) -> Result<serde_json::Value, InvokeError> {
        tokio::time::sleep(self.delay).await;
        Ok(serde_json::json!({
            "backend": backend.id,
            "task_id": request.task_id,
            "echo": request.payload,
        }))
    }
}
