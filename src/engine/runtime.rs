// src/engine/runtime.rs

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::dag::scheduler::{FailureAction, InstanceRef, Scheduler};
use crate::dag::TaskGraph;
use crate::engine::results::{FailureReason, RunOutcome, RunStatus};
use crate::errors::TaskError;
use crate::exec::pool::{Completion, ExecutorPool, Submission};
use crate::registry::TaskRegistry;

/// Events consumed by the coordinator loop.
///
/// The executor pool sends `Completed`; back-off timers send `RetryDue`.
#[derive(Debug)]
pub enum RunEvent {
    Completed(Completion),
    RetryDue { at: InstanceRef },
}

/// What woke the coordinator this iteration.
enum Wake {
    Cancelled,
    DeadlineExpired,
    Event(Option<RunEvent>),
}

/// The coordinator that owns one run.
///
/// Single-threaded and cooperative: it never blocks on a handler, only on
/// the shared event stream, on back-pressure while submitting, and on
/// retry back-off timers. All parallelism lives in the executor pool.
pub struct Runtime {
    scheduler: Scheduler,
    registry: TaskRegistry,
    config: EngineConfig,
    pool: ExecutorPool,
    events_tx: mpsc::Sender<RunEvent>,
    events_rx: mpsc::Receiver<RunEvent>,
    /// Cancel handles for in-flight instances.
    active: HashMap<InstanceRef, CancellationToken>,
    /// External cancel for the whole run.
    cancel: CancellationToken,
}

impl Runtime {
    pub fn new(graph: Arc<TaskGraph>, registry: TaskRegistry, config: EngineConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel::<RunEvent>(64);
        let pool = ExecutorPool::new(&config, events_tx.clone());

        Self {
            scheduler: Scheduler::new(graph),
            registry,
            config,
            pool,
            events_tx,
            events_rx,
            active: HashMap::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Token that cancels the whole run when triggered. In-flight handlers
    /// observe the cancellation through their context.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drive the run to completion and return its outcome.
    pub async fn run(mut self) -> RunOutcome {
        info!(nodes = self.scheduler.graph().len(), "run started");

        let ready = self.scheduler.start();
        self.dispatch(ready).await;

        let deadline = self
            .config
            .deadline()
            .map(|d| tokio::time::Instant::now() + d);
        let run_cancel = self.cancel.clone();
        let mut abort_status: Option<RunStatus> = None;

        loop {
            if abort_status.is_some() {
                // Aborted: drain in-flight completions so the outcome map
                // is accurate, dispatch nothing new.
                if self.active.is_empty() {
                    break;
                }
                match self.events_rx.recv().await {
                    Some(RunEvent::Completed(completion)) => self.settle_aborted(completion),
                    Some(RunEvent::RetryDue { .. }) => {}
                    None => break,
                }
                continue;
            }

            if self.scheduler.is_complete() {
                break;
            }

            let wake = tokio::select! {
                _ = run_cancel.cancelled() => Wake::Cancelled,
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(tokio::time::Instant::now)),
                        if deadline.is_some() => Wake::DeadlineExpired,
                event = self.events_rx.recv() => Wake::Event(event),
            };

            match wake {
                Wake::Cancelled => {
                    info!("run cancelled; stopping in-flight tasks");
                    self.cancel_active();
                    abort_status = Some(RunStatus::Cancelled);
                }
                Wake::DeadlineExpired => {
                    warn!("run deadline expired; cancelling in-flight tasks");
                    let nodes = self.active_nodes();
                    self.cancel_active();
                    abort_status = Some(RunStatus::Failed {
                        reason: FailureReason::Deadline,
                        nodes,
                    });
                }
                Wake::Event(Some(RunEvent::Completed(completion))) => {
                    self.handle_completion(completion).await;
                }
                Wake::Event(Some(RunEvent::RetryDue { at })) => {
                    if self.scheduler.retry_ready(at) {
                        self.dispatch(vec![at]).await;
                    }
                }
                // Unreachable while we hold our own events_tx clone.
                Wake::Event(None) => break,
            }
        }

        let outcome = self.scheduler.into_outcome(abort_status);
        info!(succeeded = outcome.succeeded(), "run finished");
        outcome
    }

    async fn handle_completion(&mut self, completion: Completion) {
        let at = InstanceRef {
            node: completion.node,
            instance: completion.instance,
        };
        self.active.remove(&at);

        match completion.outcome {
            Ok(value) => {
                if let Some(node) = self.scheduler.handle_success(at, value) {
                    self.apply_branch_selection(node);
                    let ready = self.scheduler.collect_ready();
                    self.dispatch(ready).await;
                }
            }
            Err(TaskError::Cancelled) => {
                self.scheduler.handle_cancelled(at);
            }
            Err(error) => match self.scheduler.handle_failure(at, &error) {
                FailureAction::Retry { attempt } => {
                    self.schedule_retry(at, attempt).await;
                }
                FailureAction::Exhausted => {}
            },
        }
    }

    /// Branch selection for a just-completed conditional node. Applied
    /// before any successor is dispatched, so sibling branches are skipped
    /// synchronously with the parent's completion.
    fn apply_branch_selection(&mut self, node: crate::dag::NodeId) {
        let graph = self.scheduler.graph().clone();
        let task = graph.node(node);
        if !task.is_conditional() {
            return;
        }

        let aggregate = self.scheduler.aggregate_value(node);
        let chosen = self
            .registry
            .lookup(&task.task_name)
            .and_then(|handler| handler.select_branch(&aggregate));

        debug!(
            node = %node,
            task = %task.task_name,
            branch = chosen.as_deref().unwrap_or("<none>"),
            "branch selected"
        );
        self.scheduler.apply_selection(node, chosen.as_deref());
    }

    async fn schedule_retry(&mut self, at: InstanceRef, attempt: u32) {
        let delay = self.config.retry_delay(attempt);

        if delay.is_zero() {
            self.dispatch(vec![at]).await;
            return;
        }

        debug!(
            node = %at.node,
            instance = at.instance,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "delaying retry"
        );

        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events_tx.send(RunEvent::RetryDue { at }).await;
        });
    }

    /// Submit instances to the pool. Suspends on the flavor's in-flight
    /// bound; completions are not processed while waiting, which is the
    /// intended back-pressure.
    async fn dispatch(&mut self, refs: Vec<InstanceRef>) {
        for at in refs {
            let graph = self.scheduler.graph().clone();
            let task = graph.node(at.node);

            let handler = match self.registry.lookup(&task.task_name) {
                Some(handler) => handler.clone(),
                None => {
                    // The builder resolves every name; losing one here means
                    // the registry changed under us.
                    warn!(task = %task.task_name, "handler vanished from registry; failing node");
                    self.scheduler.handle_failure(
                        at,
                        &TaskError::NonRetryable(serde_json::Value::String(
                            "handler not registered".to_string(),
                        )),
                    );
                    continue;
                }
            };

            let input = self.scheduler.input_for(at);
            let attempt = self.scheduler.mark_dispatched(at);
            let cancel = self.cancel.child_token();
            self.active.insert(at, cancel.clone());

            self.pool
                .submit(Submission {
                    node: at.node,
                    instance: at.instance,
                    attempt,
                    task_name: task.task_name.clone(),
                    handler,
                    input,
                    cancel,
                })
                .await;
        }
    }

    /// Record a completion that arrived after the run was aborted.
    fn settle_aborted(&mut self, completion: Completion) {
        let at = InstanceRef {
            node: completion.node,
            instance: completion.instance,
        };
        self.active.remove(&at);

        match completion.outcome {
            Ok(value) => {
                let _ = self.scheduler.handle_success(at, value);
            }
            Err(TaskError::Cancelled) => {
                self.scheduler.handle_cancelled(at);
            }
            Err(error) => {
                let _ = self.scheduler.handle_failure(at, &error);
            }
        }
    }

    fn active_nodes(&self) -> Vec<crate::dag::NodeId> {
        let mut nodes: Vec<_> = self.active.keys().map(|at| at.node).collect();
        nodes.sort();
        nodes.dedup();
        nodes
    }

    fn cancel_active(&self) {
        for token in self.active.values() {
            token.cancel();
        }
    }
}
