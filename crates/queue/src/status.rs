//! Client-facing task status.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};

use crate::backend::ResultBackend;
use crate::state::{TaskRecord, TaskState};
use crate::task::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Started,
    Retry,
    Success,
    Failure,
    Ignored,
    Revoked,
    /// The id was never issued or its result has expired.
    NotFound,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Success
                | TaskStatus::Failure
                | TaskStatus::Ignored
                | TaskStatus::Revoked
                | TaskStatus::NotFound
        )
    }
}

/// Status of a tracked task, after following replacements.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub result: Option<Value>,
}

impl StatusReport {
    fn not_found(task_id: TaskId) -> Self {
        Self {
            task_id,
            status: TaskStatus::NotFound,
            result: None,
        }
    }

    fn from_record(task_id: TaskId, record: TaskRecord) -> Self {
        let error = || {
            record
                .error
                .as_ref()
                .map(|e| json!({ "error": e.message, "kind": e.kind }))
        };
        let (status, result) = match record.state {
            TaskState::Pending => (TaskStatus::Pending, None),
            TaskState::Started => (TaskStatus::Started, None),
            TaskState::Retry => (TaskStatus::Retry, error()),
            TaskState::Success => (TaskStatus::Success, record.result.clone()),
            TaskState::Failure => (TaskStatus::Failure, error()),
            TaskState::Ignored => (TaskStatus::Ignored, record.result.clone()),
            TaskState::Revoked => (TaskStatus::Revoked, None),
            // Unresolvable chain (too many hops); the hand-off is in flight.
            TaskState::Replaced => (TaskStatus::Started, None),
        };
        Self {
            task_id,
            status,
            result,
        }
    }
}

/// Answers "what is the state of task X" for clients.
#[derive(Clone)]
pub struct StatusReporter {
    backend: Arc<dyn ResultBackend>,
}

impl StatusReporter {
    pub fn new(backend: Arc<dyn ResultBackend>) -> Self {
        Self { backend }
    }

    /// Status of `task_id`, reported under the id the client holds even
    /// when the work has been handed over to another task.
    /// A chord body still waiting on its header reports STARTED as soon as
    /// any header task has been picked up.
    pub async fn report(&self, task_id: TaskId) -> StatusReport {
        let Some(record) = self.backend.resolve(task_id).await else {
            return StatusReport::not_found(task_id);
        };
        let header_active =
            record.state == TaskState::Pending && self.any_picked_up(&record.header).await;
        let mut report = StatusReport::from_record(task_id, record);
        if header_active {
            report.status = TaskStatus::Started;
        }
        report
    }

    async fn any_picked_up(&self, ids: &[TaskId]) -> bool {
        for id in ids {
            if let Some(record) = self.backend.get(*id).await {
                if record.state != TaskState::Pending {
                    return true;
                }
            }
        }
        false
    }

    /// Poll until the task reaches a terminal status or `timeout` elapses.
    pub async fn wait(&self, task_id: TaskId, poll: Duration, timeout: Duration) -> StatusReport {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let report = self.report(task_id).await;
            if report.status.is_terminal() || tokio::time::Instant::now() >= deadline {
                return report;
            }
            tokio::time::sleep(poll).await;
        }
    }
}
