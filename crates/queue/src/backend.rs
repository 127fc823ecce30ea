//! Result backend: one durable record per task id.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::state::{StateChange, TaskRecord, TaskState};
use crate::task::TaskId;

/// Upper bound on replacement hops followed when resolving a task id.
pub const MAX_REPLACEMENT_HOPS: usize = 16;

/// Result of an atomic state transition.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    Applied(TaskRecord),
    /// The state machine refused the change; carries the current record.
    Rejected(TaskRecord),
    Unknown,
}

#[async_trait]
pub trait ResultBackend: Send + Sync {
    /// Create the record if no record exists for its id yet. Returns
    /// whether a record was created.
    async fn insert(&self, record: TaskRecord) -> bool;

    /// Raw record lookup. Expired records are not returned.
    async fn get(&self, id: TaskId) -> Option<TaskRecord>;

    /// Atomically apply a state change.
    async fn update(&self, id: TaskId, change: StateChange) -> UpdateOutcome;

    /// Drop expired records; returns how many were removed.
    async fn remove_expired(&self) -> usize;

    /// Follow replacement redirects from `id` to the record that currently
    /// stands for it.
    async fn resolve(&self, id: TaskId) -> Option<TaskRecord> {
        let mut current = self.get(id).await?;
        for _ in 0..MAX_REPLACEMENT_HOPS {
            match (current.state, current.replaced_by) {
                (TaskState::Replaced, Some(next)) => current = self.get(next).await?,
                _ => return Some(current),
            }
        }
        tracing::warn!(task_id = %id, "Replacement chain too long; reporting last hop");
        Some(current)
    }
}

/// In-process result backend with time-based expiry of completed records.
pub struct MemoryResultBackend {
    records: RwLock<HashMap<TaskId, TaskRecord>>,
    ttl: chrono::Duration,
}

impl MemoryResultBackend {
    pub fn new(ttl: Duration) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX),
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl ResultBackend for MemoryResultBackend {
    async fn insert(&self, record: TaskRecord) -> bool {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return false;
        }
        records.insert(record.id, record);
        true
    }

    async fn get(&self, id: TaskId) -> Option<TaskRecord> {
        let records = self.records.read().await;
        records
            .get(&id)
            .filter(|r| !r.is_expired(Utc::now(), self.ttl))
            .cloned()
    }

    async fn update(&self, id: TaskId, change: StateChange) -> UpdateOutcome {
        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(&id) else {
            return UpdateOutcome::Unknown;
        };
        if record.apply(change, Utc::now()) {
            UpdateOutcome::Applied(record.clone())
        } else {
            UpdateOutcome::Rejected(record.clone())
        }
    }

    async fn remove_expired(&self) -> usize {
        let now = Utc::now();
        let mut records = self.records.write().await;
        let before = records.len();

        records.retain(|_, r| !r.is_expired(now, self.ttl));

        // Drop replacement markers whose target is gone, repeating so that
        // chains collapse from the far end.
        loop {
            let dangling: Vec<TaskId> = records
                .values()
                .filter(|r| r.state == TaskState::Replaced)
                .filter(|r| r.replaced_by.map_or(true, |to| !records.contains_key(&to)))
                .map(|r| r.id)
                .collect();
            if dangling.is_empty() {
                break;
            }
            for id in dangling {
                records.remove(&id);
            }
        }

        before - records.len()
    }
}
