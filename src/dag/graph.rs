// src/dag/graph.rs

use std::fmt;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::lang::Expr;

/// Identifier of a node within one plan. Stable for the plan's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Label on a dependency edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// `->`: the predecessor result fills one input slot of the successor.
    Seq,
    /// `|->`: the predecessor result is delivered unchanged to every
    /// broadcast successor independently.
    Broadcast,
    /// Call-node edge to a conditional child; satisfied only when the
    /// parent's branch selection picks that child.
    Conditional,
}

/// One task invocation in the plan.
#[derive(Debug, Clone)]
pub struct TaskNode {
    pub id: NodeId,
    pub task_name: String,
    /// Additional attempts after the first; 0 means run once.
    pub retry_budget: u32,
    /// Independent runtime instances of this node; at least 1.
    pub replica_count: u32,
    /// Entry nodes of each conditional branch group, in source order.
    /// Empty for non-conditional nodes.
    pub branches: Vec<Vec<NodeId>>,
}

impl TaskNode {
    pub fn is_conditional(&self) -> bool {
        !self.branches.is_empty()
    }
}

/// Immutable task-graph plan, shared read-only with the scheduler.
///
/// Adjacency is kept in both directions, the way the scheduler walks it:
/// predecessors for readiness, successors for result delivery and failure
/// propagation.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    nodes: Vec<TaskNode>,
    preds: Vec<Vec<(NodeId, EdgeKind)>>,
    succs: Vec<Vec<(NodeId, EdgeKind)>>,
    /// Canonicalized operator tree this plan was lowered from; kept so the
    /// plan can be rendered back to pointy source.
    plan: Expr,
}

impl TaskGraph {
    pub(crate) fn new(
        nodes: Vec<TaskNode>,
        preds: Vec<Vec<(NodeId, EdgeKind)>>,
        succs: Vec<Vec<(NodeId, EdgeKind)>>,
        plan: Expr,
    ) -> Self {
        Self {
            nodes,
            preds,
            succs,
            plan,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &TaskNode {
        &self.nodes[id.0]
    }

    pub fn nodes(&self) -> impl Iterator<Item = &TaskNode> {
        self.nodes.iter()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).map(NodeId)
    }

    /// Immediate predecessors of a node with the edge kind leading in.
    pub fn preds_of(&self, id: NodeId) -> &[(NodeId, EdgeKind)] {
        &self.preds[id.0]
    }

    /// Immediate successors of a node with the edge kind leading out.
    pub fn succs_of(&self, id: NodeId) -> &[(NodeId, EdgeKind)] {
        &self.succs[id.0]
    }

    /// Nodes with no incoming edges; a run starts here.
    pub fn entry_frontier(&self) -> Vec<NodeId> {
        self.node_ids()
            .filter(|id| self.preds[id.0].is_empty())
            .collect()
    }

    /// Nodes with no outgoing edges; their aggregate status decides the
    /// run outcome.
    pub fn exit_frontier(&self) -> Vec<NodeId> {
        self.node_ids()
            .filter(|id| self.succs[id.0].is_empty())
            .collect()
    }

    /// The operator tree this plan was lowered from.
    pub fn plan(&self) -> &Expr {
        &self.plan
    }

    /// Render the plan back to canonical pointy source.
    pub fn to_pointy(&self) -> String {
        super::canon::render(&self.plan)
    }

    /// Defensive acyclicity check. The grammar admits no recursion, so this
    /// should never fire; it exists to catch lowering regressions.
    pub(crate) fn check_acyclic(&self) -> Result<(), NodeId> {
        let mut graph: DiGraphMap<usize, ()> = DiGraphMap::new();

        for id in self.node_ids() {
            graph.add_node(id.0);
        }
        for id in self.node_ids() {
            for (succ, _) in self.succs_of(id) {
                graph.add_edge(id.0, succ.0, ());
            }
        }

        match toposort(&graph, None) {
            Ok(_order) => Ok(()),
            Err(cycle) => Err(NodeId(cycle.node_id())),
        }
    }
}
