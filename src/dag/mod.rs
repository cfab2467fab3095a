// src/dag/mod.rs

//! Task-graph plan and per-run scheduling state.
//!
//! - [`graph`] is the immutable plan the front end lowers into
//! - [`build`] does that lowering, consulting the task registry
//! - [`scheduler`] owns the mutable state of one run over a plan
//! - [`canon`] renders a plan back to pointy source
//! - [`dot`] renders a plan as a Graphviz digraph

pub mod build;
pub mod canon;
pub mod dot;
pub mod graph;
pub mod scheduler;

pub use build::{build, BuildError};
pub use graph::{EdgeKind, NodeId, TaskGraph, TaskNode};
pub use scheduler::{InstanceRef, NodeStatus, Scheduler};
