//! Distributed-queue task execution engine.
//!
//! A [`TaskEngine`](engine::TaskEngine) ties together a [`Broker`](broker::Broker)
//! (at-least-once delivery), a [`ResultBackend`](backend::ResultBackend)
//! (one durable result slot per task) and a [`TaskRegistry`](registry::TaskRegistry).
//! A [`WorkerPool`](worker::WorkerPool) pulls one message per execution slot,
//! enforces soft/hard time limits, retries retryable failures and recycles
//! slots after a bounded number of tasks.
//!
//! Workflows are either a single task or a chord: a header of independent
//! tasks joined by a barrier body that receives every header result in
//! header order. A running task may replace itself with a workflow; its id
//! then tracks the workflow's terminal task.

pub mod backend;
pub mod barrier;
pub mod broker;
pub mod config;
pub mod engine;
pub mod error;
pub mod registry;
pub mod retention;
pub mod state;
pub mod status;
pub mod task;
pub mod worker;

pub use config::EngineConfig;
pub use engine::TaskEngine;
pub use error::EngineError;
pub use registry::TaskRegistry;
pub use status::{StatusReport, StatusReporter, TaskStatus};
pub use task::{
    Signature, Task, TaskContext, TaskError, TaskFailure, TaskId, TaskInput, TaskOutcome,
    Workflow,
};
pub use worker::WorkerPool;
