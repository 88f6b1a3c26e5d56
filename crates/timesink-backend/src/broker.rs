//! Message queue trait and in-memory implementation.
//!
//! The broker delivers batches at least once: a delivery stays unacked until
//! the worker acks it, rejects it back onto the queue (transient failure), or
//! rejects it for good (malformed payload). `reconnect` re-establishes the
//! channel and re-applies the declare protocol (durable queue,
//! `auto_delete = false`, prefetch, `no_ack = false`).

use crate::error::{BackendError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

/// Channel/consumer options applied on every (re)connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueOptions {
    pub queue: String,
    pub prefetch_count: u16,
    pub auto_delete: bool,
    pub no_ack: bool,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            queue: "timesink".to_string(),
            prefetch_count: 20,
            auto_delete: false,
            no_ack: false,
        }
    }
}

/// One message handed to the consumer, identified by its delivery tag.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub tag: u64,
    pub body: Bytes,
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Wait up to `timeout` for a delivery; `None` when the queue stayed
    /// empty.
    async fn recv(&self, timeout: Duration) -> Result<Option<Delivery>>;

    async fn ack(&self, tag: u64) -> Result<()>;

    /// Reject a delivery; with `requeue` the broker redelivers it, without it
    /// the message is dropped.
    async fn reject(&self, tag: u64, requeue: bool) -> Result<()>;

    /// Tear down and re-establish the channel, redeclaring the queue and
    /// consumer options. Unacked deliveries return to the queue.
    async fn reconnect(&self) -> Result<()>;
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<(u64, Bytes)>,
    unacked: HashMap<u64, Bytes>,
}

/// In-memory queue with delivery tags, requeue-on-reject, and
/// redeliver-on-reconnect.
pub struct MemoryQueue {
    options: QueueOptions,
    state: Mutex<QueueState>,
    notify: Notify,
    next_tag: AtomicU64,
    reconnects: AtomicUsize,
}

impl MemoryQueue {
    pub fn new(options: QueueOptions) -> Self {
        Self {
            options,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            next_tag: AtomicU64::new(1),
            reconnects: AtomicUsize::new(0),
        }
    }

    pub fn options(&self) -> &QueueOptions {
        &self.options
    }

    /// Enqueue a message (the producer side, used by tests and demos).
    pub async fn publish(&self, body: Bytes) {
        let tag = self.next_tag.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock().await;
        state.ready.push_back((tag, body));
        self.notify.notify_waiters();
    }

    /// Messages waiting for delivery.
    pub async fn depth(&self) -> usize {
        self.state.lock().await.ready.len()
    }

    /// Deliveries awaiting ack or reject.
    pub async fn unacked_count(&self) -> usize {
        self.state.lock().await.unacked.len()
    }

    pub fn reconnect_count(&self) -> usize {
        self.reconnects.load(Ordering::Relaxed)
    }

    async fn try_take(&self) -> Option<Delivery> {
        let mut state = self.state.lock().await;
        let (tag, body) = state.ready.pop_front()?;
        state.unacked.insert(tag, body.clone());
        Some(Delivery { tag, body })
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(QueueOptions::default())
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    async fn recv(&self, timeout: Duration) -> Result<Option<Delivery>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(delivery) = self.try_take().await {
                return Ok(Some(delivery));
            }
            let notified = self.notify.notified();
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => {
                    return Ok(self.try_take().await);
                }
            }
        }
    }

    async fn ack(&self, tag: u64) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .unacked
            .remove(&tag)
            .map(|_| ())
            .ok_or(BackendError::UnknownDelivery(tag))
    }

    async fn reject(&self, tag: u64, requeue: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        let body = state
            .unacked
            .remove(&tag)
            .ok_or(BackendError::UnknownDelivery(tag))?;
        if requeue {
            state.ready.push_front((tag, body));
            self.notify.notify_waiters();
        }
        Ok(())
    }

    async fn reconnect(&self) -> Result<()> {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock().await;
        // A dropped channel returns its unacked deliveries to the queue.
        let mut returned: Vec<(u64, Bytes)> = state.unacked.drain().collect();
        returned.sort_by_key(|(tag, _)| *tag);
        for entry in returned.into_iter().rev() {
            state.ready.push_front(entry);
        }
        self.notify.notify_waiters();
        Ok(())
    }
}
