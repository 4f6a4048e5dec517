//! In-process lease queue.
//!
//! Mirrors the Redis queue's contract inside one process. Lease deadlines use
//! `tokio::time::Instant`, so tests can drive expiry with paused time.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, info};

use anon_models::{LeaseState, WorkItem};

use crate::error::QueueResult;
use crate::queue::LeaseQueue;

#[derive(Debug)]
struct LeasedEntry {
    item: WorkItem,
    state: LeaseState,
    deadline: Instant,
}

#[derive(Debug, Default)]
struct State {
    pending: VecDeque<WorkItem>,
    leased: Vec<LeasedEntry>,
    completed: Vec<WorkItem>,
    side_queues: HashMap<String, Vec<WorkItem>>,
}

impl State {
    /// Flip leases whose deadline passed to `Expired`.
    fn mark_expired(&mut self, now: Instant) -> QueueResult<()> {
        for entry in &mut self.leased {
            if entry.state == LeaseState::Leased && entry.deadline <= now {
                entry.state = entry.state.expire()?;
            }
        }
        Ok(())
    }
}

/// In-memory lease queue.
#[derive(Debug)]
pub struct MemoryQueue {
    name: String,
    state: Mutex<State>,
    available: Notify,
}

impl MemoryQueue {
    /// Create an empty queue.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(State::default()),
            available: Notify::new(),
        }
    }

    /// Create a queue pre-populated with `items`, served in order.
    pub fn with_items<I, T>(name: impl Into<String>, items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<WorkItem>,
    {
        let state = State {
            pending: items.into_iter().map(Into::into).collect(),
            ..State::default()
        };
        Self {
            name: name.into(),
            state: Mutex::new(state),
            available: Notify::new(),
        }
    }

    /// Add an item to the back of the queue.
    pub async fn push(&self, item: impl Into<WorkItem>) {
        self.state.lock().await.pending.push_back(item.into());
        self.available.notify_one();
    }

    /// Items acknowledged so far, in acknowledgement order.
    pub async fn completed(&self) -> Vec<WorkItem> {
        self.state.lock().await.completed.clone()
    }

    /// Contents of the side queue `queue_name`.
    pub async fn side_queue(&self, queue_name: &str) -> Vec<WorkItem> {
        self.state
            .lock()
            .await
            .side_queues
            .get(queue_name)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of unclaimed items.
    pub async fn pending_len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    async fn try_lease(&self, lease: Duration) -> QueueResult<Option<WorkItem>> {
        let mut state = self.state.lock().await;
        let Some(item) = state.pending.pop_front() else {
            return Ok(None);
        };

        state.leased.push(LeasedEntry {
            item: item.clone(),
            state: LeaseState::Unclaimed.lease()?,
            deadline: Instant::now() + lease,
        });

        debug!(queue = %self.name, item = %item, "Leased item for {:?}", lease);
        Ok(Some(item))
    }
}

#[async_trait]
impl LeaseQueue for MemoryQueue {
    async fn empty(&self) -> QueueResult<bool> {
        let state = self.state.lock().await;
        Ok(state.pending.is_empty() && state.leased.is_empty())
    }

    async fn lease(
        &self,
        lease: Duration,
        block: bool,
        poll_timeout: Duration,
    ) -> QueueResult<Option<WorkItem>> {
        if let Some(item) = self.try_lease(lease).await? {
            return Ok(Some(item));
        }
        if !block {
            return Ok(None);
        }

        // Wake on push or poll timeout, then look once more.
        let _ = tokio::time::timeout(poll_timeout, self.available.notified()).await;
        self.try_lease(lease).await
    }

    async fn complete(&self, item: &WorkItem) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        state.mark_expired(Instant::now())?;

        let position = state
            .leased
            .iter()
            .position(|e| &e.item == item && e.state == LeaseState::Leased);

        match position {
            Some(index) => {
                let entry = state.leased.remove(index);
                debug_assert!(entry.state.complete().is_terminal());
                state.completed.push(entry.item);
                debug!(queue = %self.name, item = %item, "Completed item");
            }
            None => {
                debug!(queue = %self.name, item = %item, "Complete ignored: no live lease");
            }
        }
        Ok(())
    }

    async fn check_expired_leases(&self) -> QueueResult<usize> {
        let mut state = self.state.lock().await;
        state.mark_expired(Instant::now())?;

        let (expired, live): (Vec<_>, Vec<_>) = std::mem::take(&mut state.leased)
            .into_iter()
            .partition(|e| e.state == LeaseState::Expired);
        state.leased = live;

        let reclaimed = expired.len();
        for entry in expired {
            entry.state.reclaim()?;
            info!(queue = %self.name, item = %entry.item, "Reclaimed expired lease");
            state.pending.push_back(entry.item);
        }

        if reclaimed > 0 {
            self.available.notify_one();
        }
        Ok(reclaimed)
    }

    async fn insert_error_queue(&self, queue_name: &str, item: &WorkItem) -> QueueResult<()> {
        self.state
            .lock()
            .await
            .side_queues
            .entry(queue_name.to_string())
            .or_default()
            .push(item.clone());
        info!(queue = %queue_name, item = %item, "Item routed to error queue");
        Ok(())
    }

    fn error_queue_name(&self) -> String {
        format!("{}:errors", self.name)
    }
}
