// src/lib.rs

//! Workflow orchestration engine for the pointy task-graph DSL.
//!
//! A pointy expression describes tasks, ordering, parallelism, conditional
//! fan-out, replication and retry policy:
//!
//! ```text
//! 3 |-> downloader -> 5 * parser || notifier -> router(success, failure)
//! ```
//!
//! The front end ([`lang`]) parses source into an operator tree, the graph
//! builder ([`dag`]) lowers it into an immutable plan against a task
//! registry ([`registry`]), and the runtime ([`engine`]) drives the plan to
//! completion over the executor pool ([`exec`]).

pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod lang;
pub mod logging;
pub mod registry;

use std::sync::Arc;

pub use config::EngineConfig;
pub use dag::{build, EdgeKind, NodeId, NodeStatus, TaskGraph};
pub use engine::{
    FailureReason, NodeError, NodeResult, NodeTiming, RunOutcome, RunStatus, Runtime,
};
pub use errors::{EngineError, TaskError};
pub use lang::{parse, SyntaxError};
pub use registry::{
    BranchSelector, CpuTask, Handler, HandlerKind, InputSlot, IoTask, TaskContext, TaskInput,
    TaskRegistry,
};

/// Parse, lower, and execute a pointy workflow to completion.
///
/// This is the high-level entry point; callers that need the plan (for
/// rendering or inspection) or a cancel handle can run the stages
/// themselves:
///
/// ```no_run
/// # async fn demo(registry: pointy::TaskRegistry) -> Result<(), pointy::EngineError> {
/// use std::sync::Arc;
///
/// let expr = pointy::parse("fetch -> 3 * transform -> store")?;
/// let graph = Arc::new(pointy::build(&expr, &registry)?);
/// let runtime = pointy::Runtime::new(graph, registry, pointy::EngineConfig::default());
/// let outcome = runtime.run().await;
/// # let _ = outcome; Ok(())
/// # }
/// ```
pub async fn run_source(
    source: &str,
    registry: TaskRegistry,
    config: EngineConfig,
) -> Result<RunOutcome, EngineError> {
    let expr = lang::parse(source)?;
    let graph = Arc::new(dag::build(&expr, &registry)?);
    let runtime = Runtime::new(graph, registry, config);
    Ok(runtime.run().await)
}
