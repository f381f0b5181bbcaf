//! Rate-limited processing of stored events.
//!
//! Each tick dequeues up to `batch_size` events, processes them
//! concurrently under a per-event timeout and acknowledges them in dequeue
//! order. A tick that finds the previous one still running does nothing.

use crate::domain::config::QueueConfig;
use crate::domain::error::RpcError;
use crate::server::processor::EventProcessor;
use crate::server::storage::{AckStatus, EventStorage, StoredEvent};
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The previous tick was still in progress.
    Busy,
    /// Storage was empty.
    Idle,
    /// A batch was processed and acknowledged.
    Processed { succeeded: usize, failed: usize },
}

/// Queue counters
#[derive(Debug, Default)]
pub struct QueueStats {
    pub ticks: AtomicU64,
    pub skipped_ticks: AtomicU64,
    pub succeeded: AtomicU64,
    pub failed: AtomicU64,
    pub timed_out: AtomicU64,
}

/// Clears the in-progress flag however the tick ends.
struct TickGuard<'a>(&'a AtomicBool);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct QueueProcessor {
    storage: Arc<dyn EventStorage>,
    processor: Arc<EventProcessor>,
    config: QueueConfig,
    processing: AtomicBool,
    stats: QueueStats,
}

impl QueueProcessor {
    pub fn new(
        storage: Arc<dyn EventStorage>,
        processor: Arc<EventProcessor>,
        config: QueueConfig,
    ) -> Self {
        Self {
            storage,
            processor,
            config,
            processing: AtomicBool::new(false),
            stats: QueueStats::default(),
        }
    }

    #[must_use]
    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }

    #[must_use]
    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    /// Run one tick.
    pub async fn tick(&self) -> TickOutcome {
        if self
            .processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.stats.skipped_ticks.fetch_add(1, Ordering::Relaxed);
            return TickOutcome::Busy;
        }
        let _guard = TickGuard(&self.processing);
        self.stats.ticks.fetch_add(1, Ordering::Relaxed);

        let batch = match self.storage.dequeue_batch(self.config.batch_size()).await {
            Ok(batch) => batch,
            Err(e) => {
                error!(error = %e, "Failed to dequeue events");
                return TickOutcome::Idle;
            }
        };
        if batch.is_empty() {
            return TickOutcome::Idle;
        }

        debug!(count = batch.len(), "Processing queued batch");
        let results = join_all(batch.iter().map(|item| self.run_item(item))).await;

        let mut succeeded = 0;
        let mut failed = 0;
        for (item, result) in batch.iter().zip(results) {
            let status = match result {
                Ok(()) => {
                    succeeded += 1;
                    AckStatus::Success
                }
                Err(e) => {
                    failed += 1;
                    AckStatus::Failed {
                        error: e.to_string(),
                    }
                }
            };
            if let Err(e) = self.storage.ack(&item.storage_id, status).await {
                warn!(storage_id = %item.storage_id, error = %e, "Failed to acknowledge event");
            }
        }

        self.stats
            .succeeded
            .fetch_add(succeeded as u64, Ordering::Relaxed);
        self.stats.failed.fetch_add(failed as u64, Ordering::Relaxed);
        TickOutcome::Processed { succeeded, failed }
    }

    /// Process one item in its own task so a timeout can abort it.
    async fn run_item(&self, item: &StoredEvent) -> Result<(), RpcError> {
        let processor = Arc::clone(&self.processor);
        let stored = item.clone();
        let mut handle = tokio::spawn(async move { processor.process_stored(&stored).await });

        match tokio::time::timeout(self.config.event_timeout, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => {
                error!(storage_id = %item.storage_id, error = %join_error, "Event processing panicked");
                Err(RpcError::HandlerFailed(format!(
                    "Event processing panicked: {join_error}"
                )))
            }
            Err(_) => {
                handle.abort();
                self.stats.timed_out.fetch_add(1, Ordering::Relaxed);
                warn!(
                    storage_id = %item.storage_id,
                    timeout_ms = self.config.event_timeout.as_millis() as u64,
                    "Event processing timed out"
                );
                Err(RpcError::EventProcessingTimeout)
            }
        }
    }

    /// Tick every `tick_interval` until the returned handle is shut down.
    pub fn spawn(self: Arc<Self>) -> QueueHandle {
        let period = self.config.tick_interval();
        debug!(
            period_ms = period.as_millis() as u64,
            batch = self.config.batch_size(),
            "Queue processor started"
        );
        let (shutdown, mut signal) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut in_flight: Option<JoinHandle<TickOutcome>> = None;
            loop {
                tokio::select! {
                    biased;
                    _ = signal.changed() => break,
                    _ = interval.tick() => {}
                }
                if in_flight
                    .as_ref()
                    .is_some_and(|running| !running.is_finished())
                {
                    self.stats.skipped_ticks.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                let queue = Arc::clone(&self);
                in_flight = Some(tokio::spawn(async move { queue.tick().await }));
            }
            if let Some(batch) = in_flight {
                if let Err(e) = batch.await {
                    error!(error = %e, "Queued batch did not complete");
                }
            }
            debug!("Queue processor stopped");
        });
        QueueHandle { shutdown, task }
    }
}

/// Running tick loop. Dropping the handle stops ticking; the batch in
/// progress still completes.
#[must_use = "dropping the handle stops the loop"]
#[derive(Debug)]
pub struct QueueHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl QueueHandle {
    /// Stop ticking and wait for the batch in progress to be acknowledged.
    ///
    /// The wait is bounded by the per-event timeout.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "Queue processor task failed");
        }
    }
}

impl std::fmt::Debug for QueueProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueProcessor")
            .field("config", &self.config)
            .field("processing", &self.is_processing())
            .finish_non_exhaustive()
    }
}
