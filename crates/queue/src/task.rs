//! Task model: signatures, workflows and the [`Task`] trait.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::EngineError;

/// Globally unique task identifier, fixed at signature creation.
pub type TaskId = Uuid;

// ---------------------------------------------------------------------------
// Signatures and workflows
// ---------------------------------------------------------------------------

/// A task invocation that has been named but not yet scheduled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    pub id: TaskId,
    pub task: String,
    pub args: Value,
}

impl Signature {
    /// New signature with a fresh id.
    pub fn new(task: impl Into<String>, args: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            task: task.into(),
            args,
        }
    }

    /// Serialize typed arguments into a new signature.
    pub fn with_args<A: Serialize>(task: impl Into<String>, args: &A) -> Result<Self, EngineError> {
        let args =
            serde_json::to_value(args).map_err(|e| EngineError::InvalidArgs(e.to_string()))?;
        Ok(Self::new(task, args))
    }
}

/// A schedulable unit: one task, or a chord of independent header tasks
/// joined by a barrier body.
#[derive(Debug, Clone, PartialEq)]
pub enum Workflow {
    Single(Signature),
    Chord {
        header: Vec<Signature>,
        body: Signature,
    },
}

impl Workflow {
    /// The task whose result is the result of the whole workflow.
    pub fn terminal_id(&self) -> TaskId {
        match self {
            Workflow::Single(sig) => sig.id,
            Workflow::Chord { body, .. } => body.id,
        }
    }

    /// Every signature in the workflow, header first.
    pub fn signatures(&self) -> Vec<&Signature> {
        match self {
            Workflow::Single(sig) => vec![sig],
            Workflow::Chord { header, body } => header.iter().chain(std::iter::once(body)).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Execution inputs and outcomes
// ---------------------------------------------------------------------------

/// Arguments handed to a task run.
#[derive(Debug, Clone, Default)]
pub struct TaskInput {
    pub args: Value,
    /// Results of the chord header, in header order, when this task is a
    /// chord body. Header tasks that did not succeed contribute `null`.
    pub header_results: Vec<Value>,
}

impl TaskInput {
    pub fn new(args: Value) -> Self {
        Self {
            args,
            header_results: Vec::new(),
        }
    }

    /// Deserialize `args` into the task's argument type.
    pub fn parse_args<T: DeserializeOwned>(&self) -> Result<T, TaskError> {
        serde_json::from_value(self.args.clone()).map_err(|e| TaskError::InvalidArgs(e.to_string()))
    }
}

/// Per-execution context.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task_id: TaskId,
    /// 1-based attempt number.
    pub attempt: u32,
    pub max_attempts: u32,
    soft_deadline: CancellationToken,
    revoked: CancellationToken,
}

impl TaskContext {
    pub fn new(task_id: TaskId, attempt: u32, max_attempts: u32) -> Self {
        Self::with_tokens(
            task_id,
            attempt,
            max_attempts,
            CancellationToken::new(),
            CancellationToken::new(),
        )
    }

    pub(crate) fn with_tokens(
        task_id: TaskId,
        attempt: u32,
        max_attempts: u32,
        soft_deadline: CancellationToken,
        revoked: CancellationToken,
    ) -> Self {
        Self {
            task_id,
            attempt,
            max_attempts,
            soft_deadline,
            revoked,
        }
    }

    /// True once the soft time limit has passed.
    pub fn soft_deadline_reached(&self) -> bool {
        self.soft_deadline.is_cancelled()
    }

    /// Resolves when the soft time limit passes.
    pub async fn soft_deadline(&self) {
        self.soft_deadline.cancelled().await
    }

    /// True once the task has been revoked while running.
    pub fn is_revoked(&self) -> bool {
        self.revoked.is_cancelled()
    }

    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// What a successful run produced.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// Terminal success with a result payload.
    Return(Value),
    /// Terminal "ignored": the task decided there was nothing to produce.
    /// The payload is a diagnostic detail, not a result.
    Ignore(Value),
    /// Hand the task's identity over to a new workflow. Whoever tracks
    /// this task id will observe the workflow's terminal result.
    Replace(Workflow),
}

/// Why a run did not produce an outcome.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// Transient failure; the engine retries until the attempt limit.
    #[error("{0}")]
    Retryable(String),

    #[error("{message}")]
    Permanent { kind: String, message: String },

    #[error("Invalid task arguments: {0}")]
    InvalidArgs(String),

    #[error("Soft time limit exceeded")]
    SoftTimeLimitExceeded,

    #[error("Hard time limit ({0:?}) exceeded")]
    TimeLimitExceeded(Duration),

    #[error("Worker lost while executing task: {0}")]
    WorkerLost(String),
}

impl TaskError {
    pub fn permanent(kind: impl Into<String>, message: impl Into<String>) -> Self {
        TaskError::Permanent {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskError::Retryable(_) | TaskError::WorkerLost(_))
    }

    /// Stable machine-readable classification.
    pub fn kind(&self) -> &str {
        match self {
            TaskError::Retryable(_) => "retryable",
            TaskError::Permanent { kind, .. } => kind,
            TaskError::InvalidArgs(_) => "invalid_args",
            TaskError::SoftTimeLimitExceeded => "soft_time_limit_exceeded",
            TaskError::TimeLimitExceeded(_) => "time_limit_exceeded",
            TaskError::WorkerLost(_) => "worker_lost",
        }
    }

    pub fn failure(&self) -> TaskFailure {
        TaskFailure {
            kind: self.kind().to_string(),
            message: self.to_string(),
        }
    }
}

/// Failure as stored in the result backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub kind: String,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Task trait
// ---------------------------------------------------------------------------

/// A named unit of work executed by the worker pool.
///
/// Delivery is at-least-once, so `run` must tolerate being invoked again
/// for the same task id after a worker loss.
#[async_trait]
pub trait Task: Send + Sync + 'static {
    /// Registry name, e.g. `ocr.render_page`.
    fn name(&self) -> &'static str;

    async fn run(&self, ctx: TaskContext, input: TaskInput) -> Result<TaskOutcome, TaskError>;

    /// Called when the task is revoked before or during execution. Used to
    /// release anything the task would otherwise have cleaned up itself.
    async fn on_revoked(&self, _ctx: TaskContext, _input: TaskInput) {}

    /// Called once the task has failed for good: no retry is left, or the
    /// run was killed at the hard time limit.
    async fn on_failure(&self, _ctx: TaskContext, _input: TaskInput, _error: &TaskError) {}
}
