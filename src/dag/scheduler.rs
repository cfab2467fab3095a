// src/dag/scheduler.rs

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, warn};

use crate::dag::graph::{EdgeKind, NodeId, TaskGraph};
use crate::engine::results::{
    FailureReason, NodeError, NodeResult, NodeTiming, ResultStore, RunOutcome, RunStatus,
};
use crate::errors::TaskError;
use crate::registry::{InputSlot, TaskInput};

/// Lifecycle of one runtime instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// Waiting on predecessors (or on branch selection).
    Pending,
    /// Dependencies satisfied; queued for dispatch.
    Ready,
    /// Handed to the executor pool.
    Running,
    Succeeded,
    Failed,
    /// On a conditional branch that was not taken.
    Skipped,
    Cancelled,
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NodeStatus::Succeeded | NodeStatus::Failed | NodeStatus::Skipped | NodeStatus::Cancelled
        )
    }
}

/// Address of one runtime instance of a node.
///
/// Most nodes have a single instance. A node declared with `k |->`/`k ->`
/// replication has `k`, and the immediate successor of such a node also
/// has `k` (per-replica fan-out, paired by index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceRef {
    pub node: NodeId,
    pub instance: usize,
}

#[derive(Debug)]
struct InstanceState {
    status: NodeStatus,
    attempts_left: u32,
    attempts_used: u32,
    value: Option<Value>,
    started: Option<Instant>,
    ended: Option<Instant>,
}

/// What the runtime should do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Attempts remain: re-dispatch this instance, after back-off if
    /// configured. `attempt` is the upcoming attempt number.
    Retry { attempt: u32 },
    /// Attempts exhausted or the failure was non-retryable; the node is
    /// Failed and its downstream has been failed with it.
    Exhausted,
}

/// Per-run state over an immutable plan.
///
/// The scheduler is pure state: it decides *what* may run and records what
/// happened, while the runtime decides *when* and owns all I/O. It is
/// responsible for:
/// - materializing runtime instances (replicas and fan-out successors)
/// - deciding when a node is ready (dependencies satisfied)
/// - composing successor inputs from predecessor results
/// - applying branch selection and recursive skipping
/// - failing dependents when a node fails
#[derive(Debug)]
pub struct Scheduler {
    graph: Arc<TaskGraph>,
    instances: Vec<Vec<InstanceState>>,
    /// Fan-out pairing: instance `i` of this node reads instance `i` of
    /// the paired predecessor instead of its aggregate.
    paired_pred: Vec<Option<NodeId>>,
    /// Conditional children chosen by each completed call node.
    selected: HashMap<NodeId, HashSet<NodeId>>,
    /// Failure detail per errored node (own failures and upstream ones).
    failures: HashMap<NodeId, NodeError>,
    results: ResultStore,
    started_at: Instant,
}

impl Scheduler {
    pub fn new(graph: Arc<TaskGraph>) -> Self {
        let mut counts = vec![1u32; graph.len()];
        let mut paired_pred = vec![None; graph.len()];

        for id in graph.node_ids() {
            let node = graph.node(id);
            if node.replica_count > 1 {
                counts[id.index()] = node.replica_count;
                continue;
            }

            // Per-replica fan-out: a node whose entire predecessor set is a
            // single replicated node runs once per replica, paired by
            // index. Any other shape joins on aggregates.
            let preds = graph.preds_of(id);
            let mut distinct: Vec<NodeId> = preds.iter().map(|(p, _)| *p).collect();
            distinct.sort();
            distinct.dedup();
            let plain = preds.iter().all(|(_, kind)| *kind != EdgeKind::Conditional);

            if plain && distinct.len() == 1 {
                let pred = graph.node(distinct[0]);
                if pred.replica_count > 1 {
                    counts[id.index()] = pred.replica_count;
                    paired_pred[id.index()] = Some(pred.id);
                }
            }
        }

        let instances = graph
            .node_ids()
            .map(|id| {
                let budget = graph.node(id).retry_budget;
                (0..counts[id.index()])
                    .map(|_| InstanceState {
                        status: NodeStatus::Pending,
                        attempts_left: budget + 1,
                        attempts_used: 0,
                        value: None,
                        started: None,
                        ended: None,
                    })
                    .collect()
            })
            .collect();

        Self {
            graph,
            instances,
            paired_pred,
            selected: HashMap::new(),
            failures: HashMap::new(),
            results: ResultStore::default(),
            started_at: Instant::now(),
        }
    }

    pub fn graph(&self) -> &Arc<TaskGraph> {
        &self.graph
    }

    /// Instances of the entry frontier, marked Ready.
    pub fn start(&mut self) -> Vec<InstanceRef> {
        let mut ready = Vec::new();
        for id in self.graph.entry_frontier() {
            ready.extend(self.mark_node_ready(id));
        }
        ready
    }

    /// Aggregate status of a node across its instances.
    pub fn node_status(&self, id: NodeId) -> NodeStatus {
        let states = &self.instances[id.index()];

        if states.iter().any(|s| s.status == NodeStatus::Cancelled) {
            NodeStatus::Cancelled
        } else if states.iter().any(|s| s.status == NodeStatus::Failed) {
            NodeStatus::Failed
        } else if states.iter().all(|s| s.status == NodeStatus::Skipped) {
            NodeStatus::Skipped
        } else if states.iter().all(|s| s.status == NodeStatus::Succeeded) {
            NodeStatus::Succeeded
        } else if states.iter().any(|s| s.status == NodeStatus::Running) {
            NodeStatus::Running
        } else if states.iter().any(|s| s.status == NodeStatus::Ready) {
            NodeStatus::Ready
        } else {
            NodeStatus::Pending
        }
    }

    pub fn instance_count(&self, id: NodeId) -> usize {
        self.instances[id.index()].len()
    }

    /// True when nothing is pending, ready or running.
    pub fn is_complete(&self) -> bool {
        !self.instances.iter().flatten().any(|s| {
            matches!(
                s.status,
                NodeStatus::Pending | NodeStatus::Ready | NodeStatus::Running
            )
        })
    }

    /// Record dispatch of an instance and return its attempt number.
    pub fn mark_dispatched(&mut self, at: InstanceRef) -> u32 {
        let state = self.state_mut(at);
        state.status = NodeStatus::Running;
        state.attempts_left = state.attempts_left.saturating_sub(1);
        state.attempts_used += 1;
        if state.started.is_none() {
            state.started = Some(Instant::now());
        }
        state.attempts_used
    }

    /// Compose the inputs for one instance from predecessor results.
    ///
    /// Skipped predecessors contribute nothing; the paired predecessor of a
    /// fan-out instance contributes its matching instance value; every
    /// other predecessor contributes its aggregate.
    pub fn input_for(&self, at: InstanceRef) -> TaskInput {
        let mut slots = Vec::new();

        for &(pred, _) in self.graph.preds_of(at.node) {
            if self.node_status(pred) != NodeStatus::Succeeded {
                continue;
            }

            let value = if self.paired_pred[at.node.index()] == Some(pred) {
                self.instances[pred.index()][at.instance]
                    .value
                    .clone()
                    .unwrap_or(Value::Null)
            } else {
                self.aggregate_value(pred)
            };

            slots.push(InputSlot {
                source: self.graph.node(pred).task_name.clone(),
                value,
            });
        }

        TaskInput::new(slots)
    }

    /// Handle a successful attempt. Returns the node id when the *whole
    /// node* (all instances) just succeeded; the runtime then applies
    /// branch selection for conditional nodes and collects newly ready
    /// work.
    pub fn handle_success(&mut self, at: InstanceRef, value: Value) -> Option<NodeId> {
        if self.failures.contains_key(&at.node) {
            // A sibling instance already failed the node; settle the late
            // instance but do not resurrect the node.
            let state = self.state_mut(at);
            state.status = NodeStatus::Succeeded;
            state.value = Some(value);
            state.ended = Some(Instant::now());
            return None;
        }

        let state = self.state_mut(at);
        state.status = NodeStatus::Succeeded;
        state.value = Some(value);
        state.ended = Some(Instant::now());

        let all_done = self.instances[at.node.index()]
            .iter()
            .all(|s| s.status == NodeStatus::Succeeded);

        if !all_done {
            return None;
        }

        let aggregate = self.aggregate_value(at.node);
        debug!(node = %at.node, task = %self.graph.node(at.node).task_name, "node succeeded");
        self.results.insert(at.node, NodeResult::Value(aggregate));
        Some(at.node)
    }

    /// Aggregate result of a succeeded node: the instance value for single
    /// instance nodes, the ordered instance values otherwise.
    pub fn aggregate_value(&self, id: NodeId) -> Value {
        let states = &self.instances[id.index()];
        if states.len() == 1 {
            states[0].value.clone().unwrap_or(Value::Null)
        } else {
            Value::Array(
                states
                    .iter()
                    .map(|s| s.value.clone().unwrap_or(Value::Null))
                    .collect(),
            )
        }
    }

    /// Apply branch selection for a completed conditional node.
    ///
    /// Exactly the branch group containing a task named `chosen` stays
    /// live; every other conditional child is skipped, recursively along
    /// its downstream subgraph. `None`, or a name matching no child, skips
    /// every branch.
    pub fn apply_selection(&mut self, node: NodeId, chosen: Option<&str>) {
        let groups = self.graph.node(node).branches.clone();
        let mut live: HashSet<NodeId> = HashSet::new();

        if let Some(name) = chosen {
            let matching = groups.iter().find(|group| {
                group
                    .iter()
                    .any(|id| self.graph.node(*id).task_name == name)
            });
            match matching {
                Some(group) => live.extend(group.iter().copied()),
                None => {
                    warn!(node = %node, branch = %name, "selected branch matches no conditional child; skipping all");
                }
            }
        } else {
            debug!(node = %node, "no branch selected; skipping all conditional children");
        }

        let skipped: Vec<NodeId> = groups
            .iter()
            .flatten()
            .copied()
            .filter(|id| !live.contains(id))
            .collect();

        self.selected.insert(node, live);
        self.mark_skipped(skipped);
    }

    /// Handle a failed attempt.
    pub fn handle_failure(&mut self, at: InstanceRef, error: &TaskError) -> FailureAction {
        if self.failures.contains_key(&at.node) {
            // A sibling instance already failed the node; no point retrying.
            let state = self.state_mut(at);
            state.status = NodeStatus::Failed;
            state.ended = Some(Instant::now());
            return FailureAction::Exhausted;
        }

        let retryable = matches!(error, TaskError::Handler(_));
        let state = self.state_mut(at);

        if retryable && state.attempts_left > 0 {
            // Re-queue the same instance; retries are serialized because a
            // new attempt is only dispatched after this completion.
            state.status = NodeStatus::Ready;
            let attempt = state.attempts_used + 1;
            debug!(
                node = %at.node,
                instance = at.instance,
                attempt,
                "attempt failed; retrying"
            );
            return FailureAction::Retry { attempt };
        }

        state.status = NodeStatus::Failed;
        state.ended = Some(Instant::now());

        warn!(
            node = %at.node,
            task = %self.graph.node(at.node).task_name,
            error = %error,
            "node failed; failing downstream dependents"
        );

        self.failures.insert(
            at.node,
            NodeError::Failed {
                message: error.to_string(),
            },
        );
        self.results
            .insert(at.node, NodeResult::Error(NodeError::Failed {
                message: error.to_string(),
            }));
        self.fail_downstream(at.node);

        FailureAction::Exhausted
    }

    /// Handle an attempt that honored a cancellation request.
    ///
    /// Does not consume retry budget: the node becomes Cancelled and its
    /// downstream is failed the same way as for an exhausted node.
    pub fn handle_cancelled(&mut self, at: InstanceRef) {
        let state = self.state_mut(at);
        state.status = NodeStatus::Cancelled;
        state.ended = Some(Instant::now());

        self.failures.insert(at.node, NodeError::Cancelled);
        self.results
            .insert(at.node, NodeResult::Error(NodeError::Cancelled));
        self.fail_downstream(at.node);
    }

    /// Re-mark a retry-delayed instance Ready for dispatch.
    pub fn retry_ready(&self, at: InstanceRef) -> bool {
        self.instances[at.node.index()][at.instance].status == NodeStatus::Ready
    }

    /// Collect every node whose dependencies just became satisfied, mark
    /// its instances Ready, and return them for dispatch.
    pub fn collect_ready(&mut self) -> Vec<InstanceRef> {
        // Decide first, then mutate to avoid borrowing issues.
        let candidates: Vec<NodeId> = self
            .graph
            .node_ids()
            .filter(|&id| self.node_status(id) == NodeStatus::Pending && self.deps_satisfied(id))
            .collect();

        let mut ready = Vec::new();
        for id in candidates {
            ready.extend(self.mark_node_ready(id));
        }
        ready
    }

    /// Dependencies of a node are satisfied when every non-Skipped
    /// predecessor has Succeeded, at least one predecessor is live, and a
    /// conditional parent has actually selected this node.
    fn deps_satisfied(&self, id: NodeId) -> bool {
        let preds = self.graph.preds_of(id);
        if preds.is_empty() {
            // Entry nodes are seeded by `start`, never collected here.
            return false;
        }

        let mut any_live = false;
        for &(pred, kind) in preds {
            match self.node_status(pred) {
                NodeStatus::Succeeded => {
                    if kind == EdgeKind::Conditional
                        && !self
                            .selected
                            .get(&pred)
                            .map(|live| live.contains(&id))
                            .unwrap_or(false)
                    {
                        return false;
                    }
                    any_live = true;
                }
                NodeStatus::Skipped => {
                    // A branch not taken; ignored for readiness.
                }
                _ => return false,
            }
        }

        any_live
    }

    fn mark_node_ready(&mut self, id: NodeId) -> Vec<InstanceRef> {
        debug!(node = %id, task = %self.graph.node(id).task_name, "dependencies satisfied; marking Ready");
        let states = &mut self.instances[id.index()];
        let mut refs = Vec::with_capacity(states.len());
        for (instance, state) in states.iter_mut().enumerate() {
            state.status = NodeStatus::Ready;
            refs.push(InstanceRef { node: id, instance });
        }
        refs
    }

    /// Skip the given nodes and, transitively, every successor whose
    /// predecessors are now all Skipped.
    fn mark_skipped(&mut self, seeds: Vec<NodeId>) {
        let mut stack = seeds;

        while let Some(id) = stack.pop() {
            if self.node_status(id) != NodeStatus::Pending {
                continue;
            }

            debug!(node = %id, task = %self.graph.node(id).task_name, "skipping (branch not taken)");
            for state in &mut self.instances[id.index()] {
                state.status = NodeStatus::Skipped;
            }
            self.results.insert(id, NodeResult::Skipped);

            for &(succ, _) in self.graph.succs_of(id) {
                let all_skipped = self
                    .graph
                    .preds_of(succ)
                    .iter()
                    .all(|&(p, _)| self.node_status(p) == NodeStatus::Skipped);
                if all_skipped {
                    stack.push(succ);
                }
            }
        }
    }

    /// Fail-fast propagation: every transitive successor that can no longer
    /// run (it has a failed or cancelled predecessor) becomes Failed with
    /// an upstream origin. In-flight siblings are untouched; parallel
    /// branches not depending on the origin continue.
    fn fail_downstream(&mut self, origin: NodeId) {
        let mut stack: Vec<NodeId> = self
            .graph
            .succs_of(origin)
            .iter()
            .map(|&(succ, _)| succ)
            .collect();

        while let Some(id) = stack.pop() {
            match self.node_status(id) {
                NodeStatus::Pending | NodeStatus::Ready => {
                    for state in &mut self.instances[id.index()] {
                        state.status = NodeStatus::Failed;
                    }
                    self.failures
                        .insert(id, NodeError::UpstreamFailed { origin });
                    self.results
                        .insert(id, NodeResult::Error(NodeError::UpstreamFailed { origin }));
                    debug!(node = %id, origin = %origin, "failed due to upstream failure");
                    stack.extend(self.graph.succs_of(id).iter().map(|&(succ, _)| succ));
                }
                _ => {
                    // Already terminal, or running a result nobody needs
                    // any more; the runtime may still cancel it.
                }
            }
        }
    }

    /// Terminal outcome. `status_override` reports deadline expiry or an
    /// external cancel; otherwise the exit frontier decides: Succeeded iff
    /// every exit node Succeeded or was Skipped with its branch.
    pub fn into_outcome(mut self, status_override: Option<RunStatus>) -> RunOutcome {
        let status = status_override.unwrap_or_else(|| {
            let exit_ok = self.graph.exit_frontier().into_iter().all(|id| {
                matches!(
                    self.node_status(id),
                    NodeStatus::Succeeded | NodeStatus::Skipped
                )
            });

            if exit_ok && self.failures.is_empty() {
                RunStatus::Succeeded
            } else {
                let mut nodes: Vec<NodeId> = self.failures.keys().copied().collect();
                nodes.sort();
                RunStatus::Failed {
                    reason: FailureReason::TaskFailures,
                    nodes,
                }
            }
        });

        let mut timings = HashMap::new();
        for id in self.graph.node_ids() {
            let states = &self.instances[id.index()];
            let attempts: u32 = states.iter().map(|s| s.attempts_used).sum();
            if attempts == 0 {
                continue;
            }
            let started = states
                .iter()
                .filter_map(|s| s.started)
                .min()
                .map(|t| t.duration_since(self.started_at));
            let ended = states
                .iter()
                .filter_map(|s| s.ended)
                .max()
                .map(|t| t.duration_since(self.started_at));
            timings.insert(
                id,
                NodeTiming {
                    started,
                    ended,
                    attempts,
                },
            );
        }

        let results = std::mem::take(&mut self.results).into_results();

        RunOutcome {
            status,
            results,
            timings,
        }
    }

    fn state_mut(&mut self, at: InstanceRef) -> &mut InstanceState {
        &mut self.instances[at.node.index()][at.instance]
    }
}
