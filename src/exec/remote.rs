// src/exec/remote.rs

//! Remote execution contract.
//!
//! Handlers registered as remote are marshalled as `{ task_name, inputs }`
//! to an endpoint the transport implementation owns. Only the contract
//! lives here; connection handling, authentication and wire format are the
//! transport's business.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One invocation shipped to a remote endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRequest {
    pub task_name: String,
    /// JSON form of the task inputs, as produced by `TaskInput::to_value`.
    pub inputs: Value,
}

/// Endpoint reply.
///
/// `retryable = false` forces immediate failure of the node regardless of
/// remaining attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RemoteResponse {
    Ok {
        value: Value,
    },
    Err {
        message: String,
        #[serde(default = "retryable_default")]
        retryable: bool,
    },
}

fn retryable_default() -> bool {
    true
}

/// Transport carrying remote invocations.
///
/// Transport-level failures (connection refused, timeouts) should be
/// reported as `RemoteResponse::Err { retryable: true, .. }` so the
/// engine's retry policy applies to them.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    async fn execute(&self, request: RemoteRequest) -> RemoteResponse;
}
