//! Task result records and their state machine.
//!
//! ```text
//! Pending -> Started -> Success | Failure | Ignored | Replaced
//!               |  ^
//!               v  |
//!              Retry
//! (any non-terminal) -> Revoked
//! ```
//!
//! Terminal records are never rewritten, which is what makes duplicate
//! deliveries harmless.

use chrono::Utc;
use folio_core::types::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::task::{TaskFailure, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Pending,
    Started,
    Retry,
    Success,
    Failure,
    Ignored,
    Revoked,
    /// Identity handed over to another task; see [`TaskRecord::replaced_by`].
    Replaced,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Success
                | TaskState::Failure
                | TaskState::Ignored
                | TaskState::Revoked
                | TaskState::Replaced
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Pending => "PENDING",
            TaskState::Started => "STARTED",
            TaskState::Retry => "RETRY",
            TaskState::Success => "SUCCESS",
            TaskState::Failure => "FAILURE",
            TaskState::Ignored => "IGNORED",
            TaskState::Revoked => "REVOKED",
            TaskState::Replaced => "REPLACED",
        }
    }
}

/// A single transition requested of the result backend.
#[derive(Debug, Clone, PartialEq)]
pub enum StateChange {
    Started { attempt: u32 },
    Retrying { attempt: u32, reason: TaskFailure },
    Succeeded(Value),
    Failed(TaskFailure),
    Ignored(Value),
    Revoked,
    Replaced { by: TaskId },
}

/// Durable result slot of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub task: String,
    pub state: TaskState,
    pub attempts: u32,
    pub result: Option<Value>,
    pub error: Option<TaskFailure>,
    pub replaced_by: Option<TaskId>,
    /// Header tasks a chord body is waiting on; empty for anything else.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub header: Vec<TaskId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub completed_at: Option<Timestamp>,
}

impl TaskRecord {
    pub fn pending(id: TaskId, task: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            task: task.into(),
            state: TaskState::Pending,
            attempts: 0,
            result: None,
            error: None,
            replaced_by: None,
            header: Vec::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Apply `change` if the state machine allows it. Returns whether the
    /// record was modified.
    pub fn apply(&mut self, change: StateChange, now: Timestamp) -> bool {
        if self.state.is_terminal() {
            return false;
        }

        match change {
            StateChange::Started { attempt } => {
                self.state = TaskState::Started;
                self.attempts = self.attempts.max(attempt);
            }
            StateChange::Retrying { attempt, reason } => {
                if self.state != TaskState::Started {
                    return false;
                }
                self.state = TaskState::Retry;
                self.attempts = self.attempts.max(attempt);
                self.error = Some(reason);
            }
            StateChange::Succeeded(result) => {
                self.state = TaskState::Success;
                self.result = Some(result);
                self.error = None;
            }
            StateChange::Failed(failure) => {
                self.state = TaskState::Failure;
                self.error = Some(failure);
            }
            StateChange::Ignored(detail) => {
                self.state = TaskState::Ignored;
                self.result = Some(detail);
                self.error = None;
            }
            StateChange::Revoked => {
                self.state = TaskState::Revoked;
            }
            StateChange::Replaced { by } => {
                self.state = TaskState::Replaced;
                self.replaced_by = Some(by);
            }
        }

        self.updated_at = now;
        if self.state.is_terminal() {
            self.completed_at = Some(now);
        }
        true
    }

    /// Whether a terminal record has outlived `ttl`. Replacement markers are
    /// kept alive by their target instead; see the result backend sweep.
    pub fn is_expired(&self, now: Timestamp, ttl: chrono::Duration) -> bool {
        if self.state == TaskState::Replaced {
            return false;
        }
        match self.completed_at {
            Some(done) => done.checked_add_signed(ttl).is_some_and(|t| t <= now),
            None => false,
        }
    }
}
