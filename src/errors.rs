// src/errors.rs

//! Crate-wide error taxonomy.
//!
//! Front-end failures (`SyntaxError`, `BuildError`) are fatal to a run and
//! live with their modules; this module re-exports them and adds the
//! per-invocation [`TaskError`] plus the umbrella [`EngineError`].

use serde_json::Value;
use thiserror::Error;

pub use crate::dag::build::BuildError;
pub use crate::lang::parser::SyntaxError;

/// Failure of a single handler invocation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TaskError {
    /// Raised by a task; consumes one retry attempt.
    #[error("task failed: {0}")]
    Handler(Value),

    /// Handler-supplied marker that skips any remaining attempts.
    #[error("task failed permanently: {0}")]
    NonRetryable(Value),

    /// The handler was asked to stop and honored the request. Does not
    /// consume an attempt; the node ends up Cancelled.
    #[error("task cancelled")]
    Cancelled,
}

/// Anything that stops a run before the first task is dispatched.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    #[error(transparent)]
    Build(#[from] BuildError),
}
