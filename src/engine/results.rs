// src/engine/results.rs

//! Run results: the in-memory result store and the terminal outcome.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::dag::NodeId;

/// Terminal disposition of one node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeResult {
    /// The node succeeded. For replicated or fan-out nodes this is the
    /// ordered collection of instance values.
    Value(Value),
    Error(NodeError),
    /// The node sat on a conditional branch that was not taken.
    Skipped,
}

impl NodeResult {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            NodeResult::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, NodeResult::Skipped)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, NodeResult::Error(_))
    }
}

/// Why a node ended in an error state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NodeError {
    /// The node's own attempts were exhausted (or failed non-retryably).
    #[error("task failed: {message}")]
    Failed { message: String },

    /// An upstream dependency failed; this node never ran.
    #[error("upstream task {origin} failed")]
    UpstreamFailed { origin: NodeId },

    /// The node's handler was cancelled.
    #[error("task cancelled")]
    Cancelled,
}

/// Single-writer map from node to terminal result.
///
/// Written only by the scheduler on completion events; read when composing
/// successor inputs and when assembling the run outcome. Nodes that never
/// settled (e.g. a run aborted by its deadline) have no entry.
#[derive(Debug, Default)]
pub struct ResultStore {
    map: HashMap<NodeId, NodeResult>,
}

impl ResultStore {
    pub fn insert(&mut self, id: NodeId, result: NodeResult) {
        self.map.insert(id, result);
    }

    pub fn get(&self, id: NodeId) -> Option<&NodeResult> {
        self.map.get(&id)
    }

    pub fn into_results(self) -> HashMap<NodeId, NodeResult> {
        self.map
    }
}

/// Wall-clock bookkeeping for one node, relative to run start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeTiming {
    pub started: Option<Duration>,
    pub ended: Option<Duration>,
    /// Handler invocations across all instances of the node.
    pub attempts: u32,
}

/// Why a run counts as failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// One or more nodes exhausted their attempts.
    TaskFailures,
    /// The run-wide deadline expired.
    Deadline,
}

/// Terminal status of a run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
    Succeeded,
    Failed {
        reason: FailureReason,
        nodes: Vec<NodeId>,
    },
    Cancelled,
}

/// Everything a caller learns about a finished run.
#[derive(Debug)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub results: HashMap<NodeId, NodeResult>,
    pub timings: HashMap<NodeId, NodeTiming>,
}

impl RunOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self.status, RunStatus::Succeeded)
    }

    pub fn result_of(&self, id: NodeId) -> Option<&NodeResult> {
        self.results.get(&id)
    }

    pub fn timing_of(&self, id: NodeId) -> Option<&NodeTiming> {
        self.timings.get(&id)
    }
}
