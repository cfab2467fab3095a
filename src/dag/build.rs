// src/dag/build.rs

//! Lowering from the parsed operator tree to an executable plan.
//!
//! Lowering folds the tree bottom-up into fragments, each exposing its
//! entry and exit frontiers, then wires fragments together:
//!
//! - `->` / `|->` add Seq/Broadcast edges from every exit of the left
//!   fragment to every entry of the right one
//! - `||` unions fragments without adding edges
//! - a descriptor multiplies the replica count of the node it binds to
//! - `*` attaches a retry budget to a single task node
//! - a conditional call wires Conditional edges from the call node to each
//!   branch's entries; the branches' exits become the construct's exits
//!
//! Every task name is resolved against the registry up front, so plans
//! never reference handlers that do not exist.

use thiserror::Error;

use crate::dag::graph::{EdgeKind, NodeId, TaskGraph, TaskNode};
use crate::lang::{Expr, Pos};
use crate::registry::TaskRegistry;

/// Lowering failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// A task name has no handler registered.
    #[error("unknown task '{name}' at {pos}")]
    UnknownTask { name: String, pos: Pos },

    /// Structurally invalid plan (e.g. a zero replication count).
    #[error("invalid plan shape at {pos}: {message}")]
    Shape { message: String, pos: Pos },

    /// Should be unreachable: the grammar admits no recursion. Kept as a
    /// cheap guard against lowering regressions.
    #[error("plan contains a dependency cycle involving '{task}'")]
    Cycle { task: String },
}

/// Lower a parsed expression into an immutable plan.
pub fn build(expr: &Expr, registry: &TaskRegistry) -> Result<TaskGraph, BuildError> {
    let mut builder = Builder {
        registry,
        nodes: Vec::new(),
        preds: Vec::new(),
        succs: Vec::new(),
    };

    builder.lower(expr)?;

    let graph = TaskGraph::new(builder.nodes, builder.preds, builder.succs, expr.clone());

    if let Err(id) = graph.check_acyclic() {
        return Err(BuildError::Cycle {
            task: graph.node(id).task_name.clone(),
        });
    }

    Ok(graph)
}

/// Entry/exit frontiers of a partially lowered subexpression.
#[derive(Debug, Clone)]
struct Fragment {
    entries: Vec<NodeId>,
    exits: Vec<NodeId>,
}

struct Builder<'a> {
    registry: &'a TaskRegistry,
    nodes: Vec<TaskNode>,
    preds: Vec<Vec<(NodeId, EdgeKind)>>,
    succs: Vec<Vec<(NodeId, EdgeKind)>>,
}

impl Builder<'_> {
    fn add_node(&mut self, name: &str, pos: Pos) -> Result<NodeId, BuildError> {
        if self.registry.lookup(name).is_none() {
            return Err(BuildError::UnknownTask {
                name: name.to_string(),
                pos,
            });
        }

        let id = NodeId(self.nodes.len());
        self.nodes.push(TaskNode {
            id,
            task_name: name.to_string(),
            retry_budget: 0,
            replica_count: 1,
            branches: Vec::new(),
        });
        self.preds.push(Vec::new());
        self.succs.push(Vec::new());
        Ok(id)
    }

    fn add_edge(&mut self, from: NodeId, to: NodeId, kind: EdgeKind) {
        self.succs[from.0].push((to, kind));
        self.preds[to.0].push((from, kind));
    }

    fn lower(&mut self, expr: &Expr) -> Result<Fragment, BuildError> {
        match expr {
            Expr::Parallel { left, right } => {
                let mut lf = self.lower(left)?;
                let rf = self.lower(right)?;
                lf.entries.extend(rf.entries);
                lf.exits.extend(rf.exits);
                Ok(lf)
            }
            Expr::Pipe { kind, left, right } => {
                let lf = self.lower(left)?;
                let rf = self.lower(right)?;

                let edge = match kind {
                    crate::lang::PipeKind::Seq => EdgeKind::Seq,
                    crate::lang::PipeKind::Broadcast => EdgeKind::Broadcast,
                };
                for &from in &lf.exits {
                    for &to in &rf.entries {
                        self.add_edge(from, to, edge);
                    }
                }

                Ok(Fragment {
                    entries: lf.entries,
                    exits: rf.exits,
                })
            }
            other => {
                let (_, fragment) = self.lower_unit(other)?;
                Ok(fragment)
            }
        }
    }

    /// Lower a task-level construct (task, call, retry, replication) and
    /// return the underlying task node alongside its fragment.
    fn lower_unit(&mut self, expr: &Expr) -> Result<(NodeId, Fragment), BuildError> {
        match expr {
            Expr::Task { name, pos } => {
                let id = self.add_node(name, *pos)?;
                Ok((
                    id,
                    Fragment {
                        entries: vec![id],
                        exits: vec![id],
                    },
                ))
            }
            Expr::Call { callee, branches } => {
                let (id, fragment) = self.lower_unit(callee)?;
                let first_group = self.nodes[id.0].branches.is_empty();

                let mut branch_exits = Vec::new();
                let mut group_entries = Vec::new();
                for branch in branches {
                    let bf = self.lower(branch)?;
                    for &entry in &bf.entries {
                        self.add_edge(id, entry, EdgeKind::Conditional);
                    }
                    group_entries.push(bf.entries);
                    branch_exits.extend(bf.exits);
                }
                self.nodes[id.0].branches.extend(group_entries);

                // The call node stops being an exit once it has branches;
                // downstream wiring attaches to the branch exits instead.
                let mut exits = if first_group {
                    Vec::new()
                } else {
                    fragment.exits
                };
                exits.extend(branch_exits);

                Ok((
                    id,
                    Fragment {
                        entries: fragment.entries,
                        exits,
                    },
                ))
            }
            Expr::Retry { task, budget } => {
                let (id, fragment) = self.lower_unit(task)?;
                self.nodes[id.0].retry_budget = *budget;
                Ok((id, fragment))
            }
            Expr::Replicate { count, child, .. } => {
                if *count == 0 {
                    return Err(BuildError::Shape {
                        message: "replication count must be at least 1".to_string(),
                        pos: child.pos(),
                    });
                }
                let (id, fragment) = self.lower_unit(child)?;
                self.nodes[id.0].replica_count =
                    self.nodes[id.0].replica_count.saturating_mul(*count);
                Ok((id, fragment))
            }
            Expr::Parallel { .. } | Expr::Pipe { .. } => Err(BuildError::Shape {
                message: "expected a single task here".to_string(),
                pos: expr.pos(),
            }),
        }
    }
}
