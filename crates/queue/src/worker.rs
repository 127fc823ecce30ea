//! Worker pool: execution slots pulling from the broker.
//!
//! Each slot holds at most one unacknowledged message (prefetch of one),
//! so a long task never blocks messages behind it on a busy slot. A slot
//! retires after `max_tasks_per_child` tasks and the supervisor starts a
//! fresh one in its place.

use std::any::Any;
use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::backend::UpdateOutcome;
use crate::broker::{Delivery, TaskMessage};
use crate::engine::{barrier_value, TaskEngine};
use crate::state::{StateChange, TaskState};
use crate::task::{Task, TaskContext, TaskError, TaskFailure, TaskInput, TaskOutcome};

/// Supervises the execution slots.
pub struct WorkerPool {
    engine: Arc<TaskEngine>,
}

enum SlotExit {
    Recycled(usize),
    Stopped(usize),
}

impl WorkerPool {
    pub fn new(engine: Arc<TaskEngine>) -> Self {
        Self { engine }
    }

    /// Run until `cancel` fires. In-flight tasks finish before returning.
    pub async fn run(self, cancel: CancellationToken) {
        let config = self.engine.config().clone();
        tracing::info!(
            concurrency = config.concurrency,
            max_tasks_per_child = config.max_tasks_per_child,
            soft_time_limit_secs = config.soft_time_limit.as_secs(),
            time_limit_secs = config.time_limit.as_secs(),
            tasks = ?self.engine.registry().names(),
            "Worker pool started",
        );

        let mut slots = JoinSet::new();
        let mut next_slot = 0;
        for _ in 0..config.concurrency {
            slots.spawn(run_slot(Arc::clone(&self.engine), next_slot, cancel.clone()));
            next_slot += 1;
        }

        while let Some(joined) = slots.join_next().await {
            let respawn = match joined {
                Ok(SlotExit::Recycled(slot)) => {
                    tracing::debug!(slot, "Execution slot recycled");
                    true
                }
                Ok(SlotExit::Stopped(_)) => false,
                Err(e) => {
                    tracing::error!(error = %e, "Execution slot crashed");
                    true
                }
            };
            if respawn && !cancel.is_cancelled() {
                slots.spawn(run_slot(Arc::clone(&self.engine), next_slot, cancel.clone()));
                next_slot += 1;
            }
        }

        let requeued = self.engine.broker().requeue_unacked().await;
        tracing::info!(requeued, "Worker pool stopped");
    }
}

async fn run_slot(engine: Arc<TaskEngine>, slot: usize, cancel: CancellationToken) -> SlotExit {
    let limit = engine.config.max_tasks_per_child;
    let mut completed = 0;

    while let Some(delivery) = engine.broker.fetch(&cancel).await {
        let span = tracing::info_span!(
            "task",
            slot,
            task_id = %delivery.message.id,
            task = %delivery.message.task,
            attempt = delivery.message.attempt,
        );
        execute(&engine, delivery).instrument(span).await;

        completed += 1;
        if completed >= limit {
            return SlotExit::Recycled(slot);
        }
    }
    SlotExit::Stopped(slot)
}

enum RunEnd {
    Finished(Result<TaskOutcome, TaskError>),
    Crashed(String),
    Revoked,
}

/// Execute one delivery and settle it with the broker.
async fn execute(engine: &TaskEngine, delivery: Delivery) {
    let Delivery { tag, message } = delivery;
    let task_id = message.id;

    let Some(task) = engine.registry.get(&message.task) else {
        tracing::error!("No task registered under this name");
        let failure = TaskFailure {
            kind: "unknown_task".to_string(),
            message: format!("Unknown task: {}", message.task),
        };
        if let UpdateOutcome::Applied(_) = engine
            .backend
            .update(task_id, StateChange::Failed(failure))
            .await
        {
            engine.notify_barrier(task_id, Value::Null).await;
        }
        engine.broker.reject(tag, false).await;
        return;
    };

    let input = TaskInput {
        args: message.args.clone(),
        header_results: message.header_results.clone(),
    };
    let revoked = CancellationToken::new();
    let soft_deadline = CancellationToken::new();
    let ctx = TaskContext::with_tokens(
        task_id,
        message.attempt,
        engine.config.max_attempts,
        soft_deadline.clone(),
        revoked.clone(),
    );

    // Registered before the state flips to Started so a concurrent revoke
    // always finds either the token or a rejected start.
    engine.running.lock().await.insert(task_id, revoked.clone());

    match engine
        .backend
        .update(
            task_id,
            StateChange::Started {
                attempt: message.attempt,
            },
        )
        .await
    {
        UpdateOutcome::Applied(_) => {}
        UpdateOutcome::Rejected(record) => {
            engine.running.lock().await.remove(&task_id);
            if record.state == TaskState::Revoked {
                tracing::info!("Skipping revoked task");
                task.on_revoked(ctx, input).await;
            } else {
                tracing::debug!(state = record.state.as_str(), "Skipping duplicate delivery");
            }
            engine.notify_barrier(task_id, barrier_value(&record)).await;
            engine.broker.ack(tag).await;
            return;
        }
        UpdateOutcome::Unknown => {
            engine.running.lock().await.remove(&task_id);
            tracing::warn!("Task has no result slot; dropping message");
            engine.broker.ack(tag).await;
            return;
        }
    }

    tracing::info!("Task started");
    let soft_limit = engine.config.soft_time_limit;
    let hard_limit = engine.config.time_limit;

    let soft_timer = tokio::spawn(async move {
        tokio::time::sleep(soft_limit).await;
        tracing::warn!(soft_time_limit = ?soft_limit, "Soft time limit reached");
        soft_deadline.cancel();
    });

    let mut handle = {
        let task = Arc::clone(&task);
        let ctx = ctx.clone();
        let input = input.clone();
        tokio::spawn(async move { task.run(ctx, input).await }.in_current_span())
    };

    let ended = tokio::select! {
        joined = tokio::time::timeout(hard_limit, &mut handle) => match joined {
            Ok(Ok(result)) => RunEnd::Finished(result),
            Ok(Err(e)) if e.is_panic() => RunEnd::Crashed(panic_message(e.into_panic())),
            Ok(Err(e)) => RunEnd::Crashed(e.to_string()),
            Err(_) => RunEnd::Finished(Err(TaskError::TimeLimitExceeded(hard_limit))),
        },
        _ = revoked.cancelled() => RunEnd::Revoked,
    };

    soft_timer.abort();
    if !handle.is_finished() {
        handle.abort();
        // Wait for the aborted run to unwind so its resources are released
        // before any cleanup below.
        let _ = (&mut handle).await;
    }
    engine.running.lock().await.remove(&task_id);

    match ended {
        RunEnd::Revoked => {
            tracing::info!("Task revoked while running");
            task.on_revoked(ctx, input).await;
            engine.notify_barrier(task_id, Value::Null).await;
        }
        RunEnd::Crashed(reason) => {
            tracing::error!(reason = %reason, "Task crashed");
            fail_or_retry(engine, &message, task, ctx, input, TaskError::WorkerLost(reason)).await;
        }
        RunEnd::Finished(Err(err)) => {
            fail_or_retry(engine, &message, task, ctx, input, err).await;
        }
        RunEnd::Finished(Ok(TaskOutcome::Return(value))) => {
            tracing::info!("Task succeeded");
            settle(engine, task, ctx, input, StateChange::Succeeded(value.clone()), value).await;
        }
        RunEnd::Finished(Ok(TaskOutcome::Ignore(detail))) => {
            tracing::info!("Task ignored");
            settle(engine, task, ctx, input, StateChange::Ignored(detail), Value::Null).await;
        }
        RunEnd::Finished(Ok(TaskOutcome::Replace(workflow))) => {
            match engine.replace(task_id, workflow).await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    task.on_revoked(ctx, input).await;
                    engine.notify_barrier(task_id, Value::Null).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Task replacement failed");
                    let err = TaskError::permanent("replace_failed", e.to_string());
                    fail_or_retry(engine, &message, task, ctx, input, err).await;
                }
            }
        }
    }

    engine.broker.ack(tag).await;
}

async fn fail_or_retry(
    engine: &TaskEngine,
    message: &TaskMessage,
    task: Arc<dyn Task>,
    ctx: TaskContext,
    input: TaskInput,
    err: TaskError,
) {
    let failure = err.failure();

    if err.is_retryable() && message.attempt < engine.config.max_attempts {
        let change = StateChange::Retrying {
            attempt: message.attempt,
            reason: failure.clone(),
        };
        match engine.backend.update(message.id, change).await {
            UpdateOutcome::Applied(_) => {
                let delay = engine.config.retry_delay;
                tracing::warn!(
                    error = %err,
                    retry_in = ?delay,
                    "Task failed; retrying",
                );
                let retry = TaskMessage {
                    attempt: message.attempt + 1,
                    ..message.clone()
                };
                engine.broker.publish(retry, Some(delay)).await;
                return;
            }
            UpdateOutcome::Rejected(record) if record.state == TaskState::Revoked => {
                task.on_revoked(ctx, input).await;
                engine.notify_barrier(message.id, Value::Null).await;
                return;
            }
            _ => {}
        }
    }

    tracing::error!(kind = %failure.kind, error = %failure.message, "Task failed");
    // Cleanup runs before the failure becomes visible to pollers.
    task.on_failure(ctx.clone(), input.clone(), &err).await;
    settle(engine, task, ctx, input, StateChange::Failed(failure), Value::Null).await;
}

/// Write a terminal state and report the task to its barrier, if any.
async fn settle(
    engine: &TaskEngine,
    task: Arc<dyn Task>,
    ctx: TaskContext,
    input: TaskInput,
    change: StateChange,
    value: Value,
) {
    let task_id = ctx.task_id;
    match engine.backend.update(task_id, change).await {
        UpdateOutcome::Applied(_) => {}
        UpdateOutcome::Rejected(record) if record.state == TaskState::Revoked => {
            tracing::info!("Task was revoked before its result was stored");
            task.on_revoked(ctx, input).await;
        }
        UpdateOutcome::Rejected(record) => {
            tracing::debug!(state = record.state.as_str(), "Result already stored");
        }
        UpdateOutcome::Unknown => {
            tracing::warn!("Task result slot vanished before settling");
        }
    }
    // Results of a revoked run still reach the barrier so whoever cleans up
    // after the chord can see what was produced.
    engine.notify_barrier(task_id, value).await;
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}
