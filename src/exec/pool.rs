// src/exec/pool.rs

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::config::EngineConfig;
use crate::dag::NodeId;
use crate::engine::runtime::RunEvent;
use crate::errors::TaskError;
use crate::exec::remote::{RemoteRequest, RemoteResponse};
use crate::registry::{Handler, TaskContext, TaskInput};

/// Finished handler invocation, reported on the shared run event stream.
#[derive(Debug)]
pub struct Completion {
    pub node: NodeId,
    pub instance: usize,
    pub attempt: u32,
    pub outcome: Result<Value, TaskError>,
}

/// One handler invocation handed to the pool.
pub struct Submission {
    pub node: NodeId,
    pub instance: usize,
    pub attempt: u32,
    pub task_name: String,
    pub handler: Handler,
    pub input: TaskInput,
    pub cancel: CancellationToken,
}

/// Bounded executor flavors behind one submit contract.
///
/// - I/O-bound and remote handlers run cooperatively on the async runtime;
///   many can be in flight, bounded by `io_inflight`.
/// - CPU-bound handlers run to completion on worker threads
///   (`spawn_blocking`), bounded by `cpu_workers`; inputs and result values
///   cross the boundary as JSON text.
///
/// Back-pressure is cooperative: [`ExecutorPool::submit`] suspends the
/// caller until a slot of the matching flavor frees up. The completion for
/// every accepted submission is always delivered, including for cancelled
/// or panicking handlers.
pub struct ExecutorPool {
    events_tx: mpsc::Sender<RunEvent>,
    io_slots: Arc<Semaphore>,
    cpu_slots: Arc<Semaphore>,
}

impl ExecutorPool {
    pub fn new(config: &EngineConfig, events_tx: mpsc::Sender<RunEvent>) -> Self {
        Self {
            events_tx,
            io_slots: Arc::new(Semaphore::new(config.io_inflight.max(1))),
            cpu_slots: Arc::new(Semaphore::new(config.cpu_workers.max(1))),
        }
    }

    /// Submit one attempt for execution.
    ///
    /// Suspends while the flavor's in-flight bound is reached. Returns as
    /// soon as the attempt is spawned; the result arrives later as a
    /// [`Completion`] on the run event stream.
    pub async fn submit(&self, submission: Submission) {
        let slots = match &submission.handler {
            Handler::Cpu(_) => &self.cpu_slots,
            Handler::Io(_) | Handler::Remote { .. } => &self.io_slots,
        };

        let permit = match slots.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                // Semaphores live as long as the pool; closed means the run
                // is being torn down and the attempt can be dropped.
                error!(task = %submission.task_name, "executor pool shut down; dropping submission");
                return;
            }
        };

        debug!(
            task = %submission.task_name,
            node = %submission.node,
            instance = submission.instance,
            attempt = submission.attempt,
            "dispatching handler"
        );

        let events_tx = self.events_tx.clone();

        match submission.handler.clone() {
            Handler::Io(task) => {
                tokio::spawn(async move {
                    let ctx = TaskContext {
                        cancel: submission.cancel.clone(),
                        attempt: submission.attempt,
                    };
                    let outcome = task.call(submission.input.clone(), ctx).await;
                    drop(permit);
                    deliver(events_tx, &submission, outcome).await;
                });
            }
            Handler::Cpu(task) => {
                // Marshal inputs to JSON text before crossing onto the
                // worker thread; the result value crosses back the same way.
                let payload = serde_json::to_string(&submission.input)
                    .unwrap_or_else(|_| "[]".to_string());

                tokio::spawn(async move {
                    let worker = tokio::task::spawn_blocking(move || -> Result<String, TaskError> {
                        let input: TaskInput = serde_json::from_str(&payload).map_err(|e| {
                            TaskError::Handler(Value::String(format!(
                                "input marshalling failed: {e}"
                            )))
                        })?;
                        let value = task.call(input)?;
                        serde_json::to_string(&value).map_err(|e| {
                            TaskError::Handler(Value::String(format!(
                                "result marshalling failed: {e}"
                            )))
                        })
                    });

                    let outcome = match worker.await {
                        Ok(Ok(text)) => serde_json::from_str::<Value>(&text).map_err(|e| {
                            TaskError::Handler(Value::String(format!(
                                "result marshalling failed: {e}"
                            )))
                        }),
                        Ok(Err(err)) => Err(err),
                        Err(join_err) => Err(TaskError::Handler(Value::String(format!(
                            "worker thread failed: {join_err}"
                        )))),
                    };

                    drop(permit);
                    deliver(events_tx, &submission, outcome).await;
                });
            }
            Handler::Remote { transport, .. } => {
                tokio::spawn(async move {
                    let request = RemoteRequest {
                        task_name: submission.task_name.clone(),
                        inputs: submission.input.to_value(),
                    };

                    let outcome = tokio::select! {
                        _ = submission.cancel.cancelled() => Err(TaskError::Cancelled),
                        response = transport.execute(request) => match response {
                            RemoteResponse::Ok { value } => Ok(value),
                            RemoteResponse::Err { message, retryable: true } => {
                                Err(TaskError::Handler(Value::String(message)))
                            }
                            RemoteResponse::Err { message, retryable: false } => {
                                Err(TaskError::NonRetryable(Value::String(message)))
                            }
                        },
                    };

                    drop(permit);
                    deliver(events_tx, &submission, outcome).await;
                });
            }
        }
    }
}

async fn deliver(
    events_tx: mpsc::Sender<RunEvent>,
    submission: &Submission,
    outcome: Result<Value, TaskError>,
) {
    let completion = Completion {
        node: submission.node,
        instance: submission.instance,
        attempt: submission.attempt,
        outcome,
    };

    // The receiver dropping mid-run means the coordinator is gone; there is
    // nobody left to care about this completion.
    let _ = events_tx.send(RunEvent::Completed(completion)).await;
}
