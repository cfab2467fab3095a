// src/registry.rs

//! Task registry: name → handler resolution.
//!
//! Registration is explicit and happens before a plan is built; the graph
//! builder refuses any task name that has no handler. Lookup returns a
//! typed handler variant so the runtime dispatches on the variant instead
//! of inspecting handlers at run time.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::errors::TaskError;
use crate::exec::remote::RemoteTransport;

/// One delivered predecessor result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSlot {
    /// Task name of the producing node.
    pub source: String,
    pub value: Value,
}

/// Inputs handed to a handler invocation: one slot per predecessor
/// delivery, in plan order. Entry tasks receive no slots.
///
/// Handlers must treat inputs as read-only; the same underlying value may
/// be delivered to several broadcast successors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskInput {
    slots: Vec<InputSlot>,
}

impl TaskInput {
    pub fn new(slots: Vec<InputSlot>) -> Self {
        Self { slots }
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn slots(&self) -> &[InputSlot] {
        &self.slots
    }

    /// The single input value, for the common one-predecessor case.
    pub fn value(&self) -> Option<&Value> {
        match self.slots.as_slice() {
            [slot] => Some(&slot.value),
            _ => None,
        }
    }

    /// First delivered value from the named task.
    pub fn get(&self, source: &str) -> Option<&Value> {
        self.slots
            .iter()
            .find(|slot| slot.source == source)
            .map(|slot| &slot.value)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.slots.iter().map(|slot| &slot.value)
    }

    /// JSON shape used on the CPU worker boundary and the remote wire.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(&self.slots).unwrap_or(Value::Null)
    }
}

/// Per-invocation context.
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// Cooperative stop signal; long-running handlers should watch it and
    /// return [`TaskError::Cancelled`] when it fires.
    pub cancel: CancellationToken,
    /// 1-based attempt number for this invocation.
    pub attempt: u32,
}

/// I/O-bound handler: runs on the cooperative pool and may suspend.
#[async_trait]
pub trait IoTask: Send + Sync {
    async fn call(&self, input: TaskInput, ctx: TaskContext) -> Result<Value, TaskError>;

    /// Branch selection for conditional nodes. Returning `None` skips every
    /// branch. Non-conditional tasks never get asked.
    fn select_branch(&self, _result: &Value) -> Option<String> {
        None
    }
}

/// CPU-bound handler: runs to completion on a worker thread. Inputs arrive
/// marshalled across the thread boundary, so implementations must not
/// assume shared state with the submitting side.
pub trait CpuTask: Send + Sync {
    fn call(&self, input: TaskInput) -> Result<Value, TaskError>;

    fn select_branch(&self, _result: &Value) -> Option<String> {
        None
    }
}

/// Branch selection for remote handlers, applied to the endpoint's value.
pub trait BranchSelector: Send + Sync {
    fn select(&self, result: &Value) -> Option<String>;
}

/// Typed handler variant resolved from the registry.
#[derive(Clone)]
pub enum Handler {
    Io(Arc<dyn IoTask>),
    Cpu(Arc<dyn CpuTask>),
    Remote {
        transport: Arc<dyn RemoteTransport>,
        selector: Option<Arc<dyn BranchSelector>>,
    },
}

impl Handler {
    pub fn kind(&self) -> HandlerKind {
        match self {
            Handler::Io(_) => HandlerKind::Io,
            Handler::Cpu(_) => HandlerKind::Cpu,
            Handler::Remote { .. } => HandlerKind::Remote,
        }
    }

    pub fn select_branch(&self, result: &Value) -> Option<String> {
        match self {
            Handler::Io(task) => task.select_branch(result),
            Handler::Cpu(task) => task.select_branch(result),
            Handler::Remote { selector, .. } => {
                selector.as_ref().and_then(|s| s.select(result))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Io,
    Cpu,
    Remote,
}

/// Name → handler map, populated explicitly at program start.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    handlers: HashMap<String, Handler>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, handler: Handler) {
        self.handlers.insert(name.into(), handler);
    }

    pub fn register_io(&mut self, name: impl Into<String>, task: impl IoTask + 'static) {
        self.register(name, Handler::Io(Arc::new(task)));
    }

    pub fn register_cpu(&mut self, name: impl Into<String>, task: impl CpuTask + 'static) {
        self.register(name, Handler::Cpu(Arc::new(task)));
    }

    pub fn register_remote(
        &mut self,
        name: impl Into<String>,
        transport: Arc<dyn RemoteTransport>,
        selector: Option<Arc<dyn BranchSelector>>,
    ) {
        self.register(
            name,
            Handler::Remote {
                transport,
                selector,
            },
        );
    }

    /// Pure, idempotent name resolution.
    pub fn lookup(&self, name: &str) -> Option<&Handler> {
        self.handlers.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(|s| s.as_str())
    }
}
