use crate::task::TaskId;

/// Errors raised by the engine itself (as opposed to task failures).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Unknown task: {0}")]
    UnknownTask(String),

    #[error("Invalid task arguments: {0}")]
    InvalidArgs(String),

    #[error("Task {0} has no result slot")]
    MissingRecord(TaskId),
}
