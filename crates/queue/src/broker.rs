//! Message broker with at-least-once delivery.
//!
//! A fetched message stays "unacked" until the consumer acks or rejects
//! it, so a consumer that disappears mid-task leaves the message
//! recoverable through [`Broker::requeue_unacked`].

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::task::TaskId;

/// Longest a consumer sleeps before re-checking the queue on its own.
const IDLE_POLL: Duration = Duration::from_secs(1);

/// A task invocation on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub id: TaskId,
    pub task: String,
    pub args: Value,
    #[serde(default)]
    pub header_results: Vec<Value>,
    /// 1-based delivery attempt.
    pub attempt: u32,
}

/// A fetched message plus the tag used to settle it.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub tag: u64,
    pub message: TaskMessage,
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// Enqueue a message, optionally holding it back for `delay`.
    async fn publish(&self, message: TaskMessage, delay: Option<Duration>);

    /// Wait for the next ready message. Returns `None` once `cancel` fires.
    async fn fetch(&self, cancel: &CancellationToken) -> Option<Delivery>;

    /// Settle a delivery as done.
    async fn ack(&self, tag: u64);

    /// Settle a delivery as not done, putting it back if `requeue`.
    async fn reject(&self, tag: u64, requeue: bool);

    /// Put every unacked message back on the queue (consumer loss).
    async fn requeue_unacked(&self) -> usize;

    /// Messages waiting, including delayed ones.
    async fn depth(&self) -> usize;
}

// ---------------------------------------------------------------------------
// In-memory broker
// ---------------------------------------------------------------------------

struct Queued {
    message: TaskMessage,
    ready_at: Instant,
}

#[derive(Default)]
struct BrokerState {
    queue: VecDeque<Queued>,
    unacked: HashMap<u64, TaskMessage>,
    next_tag: u64,
}

/// Single-process broker backed by a FIFO queue.
#[derive(Default)]
pub struct MemoryBroker {
    state: Mutex<BrokerState>,
    notify: Notify,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn unacked(&self) -> usize {
        self.state.lock().await.unacked.len()
    }

    /// Pop the first ready message, or report when the next one matures.
    async fn try_take(&self) -> Result<Delivery, Option<Instant>> {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        let ready = state.queue.iter().position(|q| q.ready_at <= now);
        if let Some(queued) = ready.and_then(|pos| state.queue.remove(pos)) {
            state.next_tag += 1;
            let tag = state.next_tag;
            state.unacked.insert(tag, queued.message.clone());
            return Ok(Delivery {
                tag,
                message: queued.message,
            });
        }

        Err(state.queue.iter().map(|q| q.ready_at).min())
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, message: TaskMessage, delay: Option<Duration>) {
        let ready_at = Instant::now() + delay.unwrap_or_default();
        self.state
            .lock()
            .await
            .queue
            .push_back(Queued { message, ready_at });
        self.notify.notify_one();
    }

    async fn fetch(&self, cancel: &CancellationToken) -> Option<Delivery> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            let wake_at = match self.try_take().await {
                Ok(delivery) => return Some(delivery),
                Err(next_ready) => {
                    let idle = Instant::now() + IDLE_POLL;
                    next_ready.map_or(idle, |at| at.min(idle))
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn ack(&self, tag: u64) {
        if self.state.lock().await.unacked.remove(&tag).is_none() {
            tracing::warn!(tag, "Ack for unknown delivery tag");
        }
    }

    async fn reject(&self, tag: u64, requeue: bool) {
        let mut state = self.state.lock().await;
        let Some(message) = state.unacked.remove(&tag) else {
            tracing::warn!(tag, "Reject for unknown delivery tag");
            return;
        };
        if requeue {
            state.queue.push_back(Queued {
                message,
                ready_at: Instant::now(),
            });
            drop(state);
            self.notify.notify_one();
        }
    }

    async fn requeue_unacked(&self) -> usize {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let mut tags: Vec<u64> = state.unacked.keys().copied().collect();
        tags.sort_unstable();
        for tag in &tags {
            if let Some(message) = state.unacked.remove(tag) {
                state.queue.push_back(Queued {
                    message,
                    ready_at: now,
                });
            }
        }
        drop(state);
        if !tags.is_empty() {
            self.notify.notify_waiters();
            self.notify.notify_one();
        }
        tags.len()
    }

    async fn depth(&self) -> usize {
        self.state.lock().await.queue.len()
    }
}
