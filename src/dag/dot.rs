// src/dag/dot.rs

//! Graphviz rendering of a plan, for inspection and docs.

use std::fmt::Write;

use crate::dag::graph::{EdgeKind, TaskGraph};

/// Render the plan as a DOT digraph.
///
/// Node labels carry the replica count and retry budget when set; broadcast
/// edges are dashed and conditional edges dotted so the three dependency
/// kinds are distinguishable at a glance.
pub fn to_dot(graph: &TaskGraph) -> String {
    let mut out = String::new();

    out.push_str("digraph plan {\n");
    out.push_str("\tnode [fontname=\"Helvetica\", fontsize=11, shape=box, style=rounded]\n");
    out.push_str("\tedge [fontname=\"Helvetica\", fontsize=10]\n");

    for node in graph.nodes() {
        let mut label = node.task_name.clone();
        if node.replica_count > 1 {
            let _ = write!(label, " x{}", node.replica_count);
        }
        if node.retry_budget > 0 {
            let _ = write!(label, " (retry {})", node.retry_budget);
        }
        let _ = writeln!(out, "\t\"{}\" [label=\"{}\"]", node.id, label);
    }

    for id in graph.node_ids() {
        for &(succ, kind) in graph.succs_of(id) {
            let attrs = match kind {
                EdgeKind::Seq => "",
                EdgeKind::Broadcast => " [style=dashed]",
                EdgeKind::Conditional => " [style=dotted, label=\"?\"]",
            };
            let _ = writeln!(out, "\t\"{}\" -> \"{}\"{}", id, succ, attrs);
        }
    }

    out.push_str("}\n");
    out
}
