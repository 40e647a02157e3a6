//! Per-agent event queues
//!
//! Every registered agent owns one bounded queue. Streaming agents are
//! additionally pushed to over their connection; HTTP agents drain their
//! queue through long-poll. Beyond the cap the oldest events are dropped,
//! so a slow poller cannot pin unbounded memory.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify, RwLock};
use tokio::time::{timeout_at, Instant};
use tracing::warn;

use crate::core::event::Event;
use crate::error::{Error, Result};

/// One agent's queue
pub struct AgentQueue {
    inner: Mutex<VecDeque<Event>>,
    notify: Notify,
    cap: usize,
}

impl AgentQueue {
    fn new(cap: usize) -> Self {
        AgentQueue {
            inner: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            cap,
        }
    }

    /// Append, dropping the oldest event beyond capacity. Returns the
    /// number of dropped events.
    async fn push(&self, event: Event) -> usize {
        let mut inner = self.inner.lock().await;
        let mut dropped = 0;
        while inner.len() >= self.cap {
            inner.pop_front();
            dropped += 1;
        }
        inner.push_back(event);
        drop(inner);
        self.notify.notify_one();
        dropped
    }

    async fn drain(&self, max_items: usize) -> Vec<Event> {
        let mut inner = self.inner.lock().await;
        let take = max_items.min(inner.len());
        inner.drain(..take).collect()
    }

    async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

/// All agent queues, seeded at registration and torn down at unregister
pub struct QueueTable {
    queues: RwLock<HashMap<String, Arc<AgentQueue>>>,
    cap: usize,
}

impl QueueTable {
    pub fn new(cap: usize) -> Self {
        QueueTable {
            queues: RwLock::new(HashMap::new()),
            cap,
        }
    }

    /// Create the agent's queue if absent
    pub async fn seed(&self, agent_id: &str) {
        let mut queues = self.queues.write().await;
        queues
            .entry(agent_id.to_string())
            .or_insert_with(|| Arc::new(AgentQueue::new(self.cap)));
    }

    /// Drop the agent's queue and everything still parked in it
    pub async fn remove(&self, agent_id: &str) {
        self.queues.write().await.remove(agent_id);
    }

    /// Enqueue for one agent. Returns false when the agent has no queue
    /// (already torn down); the caller treats that as best-effort loss.
    pub async fn enqueue(&self, agent_id: &str, event: Event) -> bool {
        // Hold the read lock across the push so a concurrent teardown
        // cannot interleave with a single event's fan-out.
        let queues = self.queues.read().await;
        let Some(queue) = queues.get(agent_id) else {
            return false;
        };
        let dropped = queue.push(event).await;
        if dropped > 0 {
            warn!(agent_id, dropped, "poll queue overflow, oldest events dropped");
        }
        true
    }

    /// Drain up to `max_items`, waiting up to `wait` for at least one
    /// event when the queue is empty. The wait ends early if the caller's
    /// future is dropped (client disconnect).
    pub async fn poll(
        &self,
        agent_id: &str,
        max_items: usize,
        wait: Duration,
    ) -> Result<Vec<Event>> {
        let queue = {
            let queues = self.queues.read().await;
            queues
                .get(agent_id)
                .cloned()
                .ok_or_else(|| Error::UnknownAgent(agent_id.to_string()))?
        };

        let deadline = Instant::now() + wait;
        loop {
            let batch = queue.drain(max_items).await;
            if !batch.is_empty() {
                return Ok(batch);
            }
            if timeout_at(deadline, queue.notify.notified()).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    /// Queue depth for the health surface
    pub async fn depth(&self, agent_id: &str) -> usize {
        let queues = self.queues.read().await;
        match queues.get(agent_id) {
            Some(queue) => queue.len().await,
            None => 0,
        }
    }
}
