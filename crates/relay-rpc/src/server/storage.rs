//! Event storage for queued processing.
//!
//! Events are enqueued by the dispatcher, dequeued in batches by the queue
//! processor and acknowledged once processed. The in-memory store treats
//! acknowledgements as bookkeeping only; a persistent store can use failed
//! acks to schedule redelivery.

use crate::ports::TimeSource;
use async_trait::async_trait;
use parking_lot::Mutex;
use shared_relay::RelayEvent;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Acknowledgements kept for inspection by the in-memory store.
const ACK_HISTORY: usize = 1024;

/// Storage errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("storage full: {capacity} events queued")]
    Full { capacity: usize },
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// A stored event awaiting processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEvent {
    pub storage_id: String,
    pub event: RelayEvent,
}

/// Processing outcome reported back to storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckStatus {
    Success,
    Failed { error: String },
}

impl AckStatus {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Storage backend for queued events.
#[async_trait]
pub trait EventStorage: Send + Sync {
    /// Store an event, returning its storage id.
    async fn enqueue(&self, event: RelayEvent) -> Result<String, StorageError>;

    /// Remove and return up to `limit` events, oldest first.
    async fn dequeue_batch(&self, limit: usize) -> Result<Vec<StoredEvent>, StorageError>;

    /// Record the outcome of processing a dequeued event.
    async fn ack(&self, storage_id: &str, status: AckStatus) -> Result<(), StorageError>;

    /// Events waiting to be dequeued.
    async fn size(&self) -> Result<usize, StorageError>;
}

/// Default FIFO storage. Ids look like `mem_<unix millis>_<counter>`.
pub struct InMemoryEventStorage {
    queue: Mutex<VecDeque<StoredEvent>>,
    counter: AtomicU64,
    capacity: Option<usize>,
    time: Arc<dyn TimeSource>,
    acks: Mutex<VecDeque<(String, AckStatus)>>,
}

impl InMemoryEventStorage {
    #[must_use]
    pub fn new(time: Arc<dyn TimeSource>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            counter: AtomicU64::new(0),
            capacity: None,
            time,
            acks: Mutex::new(VecDeque::new()),
        }
    }

    /// Reject enqueues beyond `capacity` pending events.
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Most recent acknowledgements, oldest first.
    #[must_use]
    pub fn acks(&self) -> Vec<(String, AckStatus)> {
        self.acks.lock().iter().cloned().collect()
    }
}

#[async_trait]
impl EventStorage for InMemoryEventStorage {
    async fn enqueue(&self, event: RelayEvent) -> Result<String, StorageError> {
        let mut queue = self.queue.lock();
        if let Some(capacity) = self.capacity {
            if queue.len() >= capacity {
                return Err(StorageError::Full { capacity });
            }
        }
        let storage_id = format!(
            "mem_{}_{}",
            self.time.now_millis(),
            self.counter.fetch_add(1, Ordering::Relaxed)
        );
        queue.push_back(StoredEvent {
            storage_id: storage_id.clone(),
            event,
        });
        Ok(storage_id)
    }

    async fn dequeue_batch(&self, limit: usize) -> Result<Vec<StoredEvent>, StorageError> {
        let mut queue = self.queue.lock();
        let take = limit.min(queue.len());
        Ok(queue.drain(..take).collect())
    }

    async fn ack(&self, storage_id: &str, status: AckStatus) -> Result<(), StorageError> {
        debug!(storage_id = %storage_id, ?status, "Event acknowledged");
        let mut acks = self.acks.lock();
        if acks.len() == ACK_HISTORY {
            acks.pop_front();
        }
        acks.push_back((storage_id.to_string(), status));
        Ok(())
    }

    async fn size(&self) -> Result<usize, StorageError> {
        Ok(self.queue.lock().len())
    }
}
