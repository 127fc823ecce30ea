//! Workflow submission, identity hand-off and revocation.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::backend::{MemoryResultBackend, ResultBackend, UpdateOutcome};
use crate::barrier::{ChordTable, ReadyBody};
use crate::broker::{Broker, MemoryBroker, TaskMessage};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::registry::TaskRegistry;
use crate::state::{StateChange, TaskRecord, TaskState};
use crate::status::StatusReporter;
use crate::task::{Signature, TaskContext, TaskId, TaskInput, Workflow};

/// Shared engine state used by producers (submit, revoke, status) and by
/// the worker pool.
pub struct TaskEngine {
    pub(crate) config: EngineConfig,
    pub(crate) registry: TaskRegistry,
    pub(crate) broker: Arc<dyn Broker>,
    pub(crate) backend: Arc<dyn ResultBackend>,
    /// Outstanding chords. Also serializes identity hand-off against
    /// revocation.
    chords: Mutex<ChordTable>,
    /// Revocation tokens of tasks currently executing.
    pub(crate) running: Mutex<HashMap<TaskId, CancellationToken>>,
}

impl TaskEngine {
    pub fn new(
        config: EngineConfig,
        registry: TaskRegistry,
        broker: Arc<dyn Broker>,
        backend: Arc<dyn ResultBackend>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            registry,
            broker,
            backend,
            chords: Mutex::new(ChordTable::default()),
            running: Mutex::new(HashMap::new()),
        })
    }

    /// Engine with the in-process broker and result backend.
    pub fn in_memory(config: EngineConfig, registry: TaskRegistry) -> Arc<Self> {
        let backend = Arc::new(MemoryResultBackend::new(config.result_expires));
        Self::new(config, registry, Arc::new(MemoryBroker::new()), backend)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn backend(&self) -> Arc<dyn ResultBackend> {
        Arc::clone(&self.backend)
    }

    pub fn broker(&self) -> Arc<dyn Broker> {
        Arc::clone(&self.broker)
    }

    pub fn status_reporter(&self) -> StatusReporter {
        StatusReporter::new(self.backend())
    }

    // -----------------------------------------------------------------------
    // Submission
    // -----------------------------------------------------------------------

    /// Schedule a workflow and return the id that tracks its result.
    pub async fn submit(&self, workflow: Workflow) -> Result<TaskId, EngineError> {
        let tracking_id = workflow.terminal_id();
        let ready = self.prepare(&workflow).await?;
        self.launch(workflow, ready).await;
        tracing::info!(task_id = %tracking_id, "Workflow submitted");
        Ok(tracking_id)
    }

    /// Create result slots and register chord barriers. Nothing is published.
    async fn prepare(&self, workflow: &Workflow) -> Result<Option<ReadyBody>, EngineError> {
        for sig in workflow.signatures() {
            if !self.registry.contains(&sig.task) {
                return Err(EngineError::UnknownTask(sig.task.clone()));
            }
        }
        let header_ids: Vec<TaskId> = match workflow {
            Workflow::Single(_) => Vec::new(),
            Workflow::Chord { header, .. } => header.iter().map(|sig| sig.id).collect(),
        };
        let terminal = workflow.terminal_id();
        for sig in workflow.signatures() {
            let mut record = TaskRecord::pending(sig.id, sig.task.clone());
            if sig.id == terminal {
                record.header = header_ids.clone();
            }
            self.backend.insert(record).await;
        }

        match workflow {
            Workflow::Single(_) => Ok(None),
            Workflow::Chord { body, .. } => {
                Ok(self
                    .chords
                    .lock()
                    .await
                    .register(header_ids, body.clone()))
            }
        }
    }

    async fn launch(&self, workflow: Workflow, ready: Option<ReadyBody>) {
        match workflow {
            Workflow::Single(sig) => self.publish(sig, Vec::new()).await,
            Workflow::Chord { header, .. } => {
                for sig in header {
                    self.publish(sig, Vec::new()).await;
                }
            }
        }
        if let Some(ready) = ready {
            if let Some((id, value)) = self.release_body(ready).await {
                self.notify_barrier(id, value).await;
            }
        }
    }

    async fn publish(&self, sig: Signature, header_results: Vec<Value>) {
        tracing::debug!(task_id = %sig.id, task = %sig.task, "Publishing task");
        self.broker
            .publish(
                TaskMessage {
                    id: sig.id,
                    task: sig.task,
                    args: sig.args,
                    header_results,
                    attempt: 1,
                },
                None,
            )
            .await;
    }

    // -----------------------------------------------------------------------
    // Identity hand-off
    // -----------------------------------------------------------------------

    /// Replace the running task `current` with `workflow`. Returns the new
    /// tracking id, or `None` if `current` was settled (revoked) meanwhile,
    /// in which case the workflow is revoked as well.
    pub(crate) async fn replace(
        &self,
        current: TaskId,
        workflow: Workflow,
    ) -> Result<Option<TaskId>, EngineError> {
        let target = workflow.terminal_id();
        let ready = self.prepare(&workflow).await?;

        let handed_over = {
            let mut chords = self.chords.lock().await;
            match self
                .backend
                .update(current, StateChange::Replaced { by: target })
                .await
            {
                UpdateOutcome::Applied(_) => {
                    chords.transfer(current, target);
                    true
                }
                UpdateOutcome::Rejected(record) => {
                    tracing::warn!(
                        task_id = %current,
                        state = record.state.as_str(),
                        "Task settled before hand-off; discarding its replacement",
                    );
                    false
                }
                UpdateOutcome::Unknown => return Err(EngineError::MissingRecord(current)),
            }
        };

        if !handed_over {
            self.revoke(target).await;
            self.launch(workflow, ready).await;
            return Ok(None);
        }

        self.launch(workflow, ready).await;
        tracing::info!(task_id = %current, replaced_by = %target, "Task replaced by workflow");
        Ok(Some(target))
    }

    // -----------------------------------------------------------------------
    // Revocation
    // -----------------------------------------------------------------------

    /// Revoke whatever `id` currently stands for. Pending tasks never run;
    /// running tasks are cancelled; a pending chord body is skipped once its
    /// outstanding header tasks have been revoked. Returns `false` if there
    /// was nothing left to revoke.
    pub async fn revoke(&self, id: TaskId) -> bool {
        let mut work = vec![id];
        let mut revoked_any = false;

        while let Some(next) = work.pop() {
            let outstanding = {
                let mut chords = self.chords.lock().await;
                let Some(record) = self.backend.resolve(next).await else {
                    continue;
                };
                if record.state.is_terminal() {
                    continue;
                }
                match chords.revoke(record.id) {
                    Some(headers) => Ok((record.id, headers)),
                    None => Err(record.id),
                }
            };

            match outstanding {
                Ok((body_id, headers)) => {
                    // The body never runs; show it as revoked right away.
                    self.backend.update(body_id, StateChange::Revoked).await;
                    tracing::info!(
                        task_id = %body_id,
                        outstanding = headers.len(),
                        "Chord revoked",
                    );
                    revoked_any = true;
                    work.extend(headers);
                }
                Err(task_id) => revoked_any |= self.revoke_task(task_id).await,
            }
        }

        revoked_any
    }

    async fn revoke_task(&self, id: TaskId) -> bool {
        match self.backend.update(id, StateChange::Revoked).await {
            UpdateOutcome::Applied(_) => {
                let token = self.running.lock().await.get(&id).cloned();
                match token {
                    // The executing worker reports to the barrier once the
                    // run has actually stopped.
                    Some(token) => token.cancel(),
                    None => self.notify_barrier(id, Value::Null).await,
                }
                tracing::info!(task_id = %id, "Task revoked");
                true
            }
            _ => false,
        }
    }

    // -----------------------------------------------------------------------
    // Barriers
    // -----------------------------------------------------------------------

    /// Report that task `id` has ended with `value` (its result, or null).
    pub(crate) async fn notify_barrier(&self, id: TaskId, value: Value) {
        let mut ended = vec![(id, value)];
        while let Some((id, value)) = ended.pop() {
            let ready = self.chords.lock().await.record(id, value);
            if let Some(ready) = ready {
                if let Some(next) = self.release_body(ready).await {
                    ended.push(next);
                }
            }
        }
    }

    /// Publish a ready chord body, or skip it if the chord was revoked.
    /// Returns the body id if it ended without being published.
    async fn release_body(&self, ready: ReadyBody) -> Option<(TaskId, Value)> {
        let ReadyBody {
            body,
            results,
            revoked,
        } = ready;

        if !revoked {
            tracing::debug!(task_id = %body.id, headers = results.len(), "Chord header complete");
            self.publish(body, results).await;
            return None;
        }

        self.backend.update(body.id, StateChange::Revoked).await;
        if let Some(task) = self.registry.get(&body.task) {
            let ctx = TaskContext::new(body.id, 0, self.config.max_attempts);
            let input = TaskInput {
                args: body.args,
                header_results: results,
            };
            task.on_revoked(ctx, input).await;
        }
        tracing::info!(task_id = %body.id, "Chord body skipped after revocation");
        Some((body.id, Value::Null))
    }
}

/// Value a settled record contributes to a chord barrier.
pub(crate) fn barrier_value(record: &TaskRecord) -> Value {
    match record.state {
        TaskState::Success => record.result.clone().unwrap_or(Value::Null),
        _ => Value::Null,
    }
}
