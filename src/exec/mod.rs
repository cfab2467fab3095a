// src/exec/mod.rs

//! Handler execution layer.
//!
//! This module actually runs handlers on behalf of the runtime:
//!
//! - [`pool`] owns the bounded executor flavors (cooperative I/O, worker
//!   threads for CPU work) and reports every completion back over the
//!   shared run event stream.
//! - [`remote`] is the request/response contract for handlers executed by
//!   a remote endpoint; the transport implementation lives outside the
//!   engine.

pub mod pool;
pub mod remote;

pub use pool::{Completion, ExecutorPool, Submission};
pub use remote::{RemoteRequest, RemoteResponse, RemoteTransport};
