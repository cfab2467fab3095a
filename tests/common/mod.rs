#![allow(dead_code)]

//! Shared fakes for integration tests: scripted handlers that record their
//! invocations and never touch real I/O.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use pointy::{IoTask, TaskContext, TaskError, TaskInput, TaskRegistry};

/// Records handler starts in order, across tasks.
#[derive(Clone, Default)]
pub struct Recorder {
    log: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.log.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn count_of(&self, name: &str) -> usize {
        self.entries().iter().filter(|e| *e == name).count()
    }

    pub fn position_of(&self, name: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == name)
    }
}

/// Succeeds immediately with a fixed value.
pub struct OkTask {
    pub name: String,
    pub value: Value,
    pub recorder: Recorder,
}

#[async_trait]
impl IoTask for OkTask {
    async fn call(&self, _input: TaskInput, _ctx: TaskContext) -> Result<Value, TaskError> {
        self.recorder.push(self.name.clone());
        Ok(self.value.clone())
    }
}

/// Fails the first `failures` attempts with a retryable error, then
/// succeeds with the given value.
pub struct FlakyTask {
    pub name: String,
    pub failures: u32,
    pub value: Value,
    pub calls: AtomicU32,
    pub recorder: Recorder,
}

#[async_trait]
impl IoTask for FlakyTask {
    async fn call(&self, _input: TaskInput, _ctx: TaskContext) -> Result<Value, TaskError> {
        self.recorder.push(self.name.clone());
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            Err(TaskError::Handler(json!({ "attempt": call + 1 })))
        } else {
            Ok(self.value.clone())
        }
    }
}

/// Always fails; retryable or not depending on `non_retryable`.
pub struct FailTask {
    pub name: String,
    pub non_retryable: bool,
    pub recorder: Recorder,
}

#[async_trait]
impl IoTask for FailTask {
    async fn call(&self, _input: TaskInput, _ctx: TaskContext) -> Result<Value, TaskError> {
        self.recorder.push(self.name.clone());
        let detail = Value::String(format!("{} exploded", self.name));
        if self.non_retryable {
            Err(TaskError::NonRetryable(detail))
        } else {
            Err(TaskError::Handler(detail))
        }
    }
}

/// Echoes its delivered inputs back as its result, for dataflow
/// assertions: `{ "inputs": [{ "source": …, "value": … }, …] }`.
pub struct EchoTask {
    pub name: String,
    pub recorder: Recorder,
}

#[async_trait]
impl IoTask for EchoTask {
    async fn call(&self, input: TaskInput, _ctx: TaskContext) -> Result<Value, TaskError> {
        self.recorder.push(self.name.clone());
        Ok(json!({ "inputs": input.to_value() }))
    }
}

/// Runs until cancelled (or a long timeout), honoring the context token.
pub struct SleepyTask {
    pub name: String,
    pub recorder: Recorder,
}

#[async_trait]
impl IoTask for SleepyTask {
    async fn call(&self, _input: TaskInput, ctx: TaskContext) -> Result<Value, TaskError> {
        self.recorder.push(self.name.clone());
        tokio::select! {
            _ = ctx.cancel.cancelled() => Err(TaskError::Cancelled),
            _ = tokio::time::sleep(Duration::from_secs(30)) => Ok(Value::Null),
        }
    }
}

/// Succeeds with the next value from a fixed list, one per call. Replica
/// instances share the handler, so each instance takes one value.
pub struct SeqValuesTask {
    pub name: String,
    pub values: Vec<Value>,
    pub calls: AtomicU32,
    pub recorder: Recorder,
}

#[async_trait]
impl IoTask for SeqValuesTask {
    async fn call(&self, _input: TaskInput, _ctx: TaskContext) -> Result<Value, TaskError> {
        self.recorder.push(self.name.clone());
        let call = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
        Ok(self.values.get(call).cloned().unwrap_or(Value::Null))
    }
}

/// Captures every delivered input for later assertions and returns null.
pub struct CaptureTask {
    pub name: String,
    pub seen: Arc<Mutex<Vec<TaskInput>>>,
    pub recorder: Recorder,
}

#[async_trait]
impl IoTask for CaptureTask {
    async fn call(&self, input: TaskInput, _ctx: TaskContext) -> Result<Value, TaskError> {
        self.recorder.push(self.name.clone());
        self.seen.lock().unwrap().push(input);
        Ok(Value::Null)
    }
}

/// Conditional dispatcher: succeeds with `{ "branch": <branch> }` and
/// selects that branch.
pub struct RouterTask {
    pub name: String,
    pub branch: Option<String>,
    pub recorder: Recorder,
}

#[async_trait]
impl IoTask for RouterTask {
    async fn call(&self, _input: TaskInput, _ctx: TaskContext) -> Result<Value, TaskError> {
        self.recorder.push(self.name.clone());
        Ok(json!({ "branch": self.branch }))
    }

    fn select_branch(&self, result: &Value) -> Option<String> {
        result
            .get("branch")
            .and_then(|b| b.as_str())
            .map(|b| b.to_string())
    }
}

/// Registry builder over the fakes above, sharing one recorder.
pub struct Fixture {
    pub registry: TaskRegistry,
    pub recorder: Recorder,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            registry: TaskRegistry::new(),
            recorder: Recorder::new(),
        }
    }

    pub fn ok(mut self, name: &str, value: Value) -> Self {
        self.registry.register_io(
            name,
            OkTask {
                name: name.to_string(),
                value,
                recorder: self.recorder.clone(),
            },
        );
        self
    }

    pub fn flaky(mut self, name: &str, failures: u32, value: Value) -> Self {
        self.registry.register_io(
            name,
            FlakyTask {
                name: name.to_string(),
                failures,
                value,
                calls: AtomicU32::new(0),
                recorder: self.recorder.clone(),
            },
        );
        self
    }

    pub fn failing(mut self, name: &str) -> Self {
        self.registry.register_io(
            name,
            FailTask {
                name: name.to_string(),
                non_retryable: false,
                recorder: self.recorder.clone(),
            },
        );
        self
    }

    pub fn failing_hard(mut self, name: &str) -> Self {
        self.registry.register_io(
            name,
            FailTask {
                name: name.to_string(),
                non_retryable: true,
                recorder: self.recorder.clone(),
            },
        );
        self
    }

    pub fn echo(mut self, name: &str) -> Self {
        self.registry.register_io(
            name,
            EchoTask {
                name: name.to_string(),
                recorder: self.recorder.clone(),
            },
        );
        self
    }

    pub fn sleepy(mut self, name: &str) -> Self {
        self.registry.register_io(
            name,
            SleepyTask {
                name: name.to_string(),
                recorder: self.recorder.clone(),
            },
        );
        self
    }

    pub fn seq_values(mut self, name: &str, values: Vec<Value>) -> Self {
        self.registry.register_io(
            name,
            SeqValuesTask {
                name: name.to_string(),
                values,
                calls: AtomicU32::new(0),
                recorder: self.recorder.clone(),
            },
        );
        self
    }

    pub fn capture(mut self, name: &str) -> (Self, Arc<Mutex<Vec<TaskInput>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        self.registry.register_io(
            name,
            CaptureTask {
                name: name.to_string(),
                seen: Arc::clone(&seen),
                recorder: self.recorder.clone(),
            },
        );
        (self, seen)
    }

    pub fn router(mut self, name: &str, branch: Option<&str>) -> Self {
        self.registry.register_io(
            name,
            RouterTask {
                name: name.to_string(),
                branch: branch.map(|b| b.to_string()),
                recorder: self.recorder.clone(),
            },
        );
        self
    }
}

/// Node id of the only node with the given task name; panics when the name
/// is absent or ambiguous.
pub fn node_named(graph: &pointy::TaskGraph, name: &str) -> pointy::NodeId {
    let mut hits = graph.nodes().filter(|n| n.task_name == name);
    let id = hits.next().expect("task name not in graph").id;
    assert!(hits.next().is_none(), "task name is ambiguous in graph");
    id
}
