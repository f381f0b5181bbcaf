//! Pending call table - settles each in-flight call exactly once.
//!
//! Maps correlation IDs to callers awaiting a reply. A call holds three
//! resources while in flight: the oneshot sender that resolves the caller,
//! the reply subscription and the listener task draining it. Whichever of
//! {matching reply, timeout, transport failure, caller gone} comes first
//! removes the entry and releases all three; later attempts find nothing.

use crate::domain::correlation::CorrelationId;
use crate::domain::error::RpcError;
use dashmap::DashMap;
use parking_lot::Mutex;
use shared_relay::SubscriptionCloser;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::debug;

/// Deadline used when `now + timeout` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Outcome delivered to the caller.
pub type CallOutcome<T> = Result<T, RpcError>;

/// Statistics for the pending call table
#[derive(Debug, Default)]
pub struct PendingStats {
    /// Total calls registered
    pub total_registered: AtomicU64,
    /// Calls settled with a reply
    pub total_completed: AtomicU64,
    /// Calls settled by their deadline
    pub total_timeouts: AtomicU64,
    /// Calls settled with any other error
    pub total_failed: AtomicU64,
    /// Calls released without an outcome (caller dropped)
    pub total_cancelled: AtomicU64,
}

impl PendingStats {
    #[must_use]
    pub fn registered(&self) -> u64 {
        self.total_registered.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn completed(&self) -> u64 {
        self.total_completed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn timeouts(&self) -> u64 {
        self.total_timeouts.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn failed(&self) -> u64 {
        self.total_failed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn cancelled(&self) -> u64 {
        self.total_cancelled.load(Ordering::Relaxed)
    }

    /// Calls that reached any terminal state.
    #[must_use]
    pub fn settled(&self) -> u64 {
        self.completed() + self.timeouts() + self.failed() + self.cancelled()
    }
}

struct PendingState<T> {
    sender: Option<oneshot::Sender<CallOutcome<T>>>,
    subscription: Option<SubscriptionCloser>,
    listener: Option<AbortHandle>,
}

/// A call waiting for its reply.
pub struct PendingCall<T> {
    correlation_id: CorrelationId,
    deadline: Instant,
    registered_at: Instant,
    state: Mutex<PendingState<T>>,
}

impl<T> PendingCall<T> {
    #[must_use]
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.state.lock().sender.is_none()
    }

    /// Hand the reply subscription to this call. Closed at once if the call
    /// already settled.
    pub fn attach_subscription(&self, closer: SubscriptionCloser) {
        let mut state = self.state.lock();
        if state.sender.is_none() {
            drop(state);
            closer.close();
            return;
        }
        state.subscription = Some(closer);
    }

    /// Hand the listener task to this call. Aborted at once if the call
    /// already settled.
    pub fn attach_listener(&self, listener: AbortHandle) {
        let mut state = self.state.lock();
        if state.sender.is_none() {
            drop(state);
            listener.abort();
            return;
        }
        state.listener = Some(listener);
    }

    /// Write-once settlement. Returns false if the call was already settled.
    ///
    /// `None` releases the resources without resolving the caller.
    fn settle(&self, outcome: Option<CallOutcome<T>>) -> bool {
        let (sender, subscription, listener) = {
            let mut state = self.state.lock();
            let Some(sender) = state.sender.take() else {
                return false;
            };
            (sender, state.subscription.take(), state.listener.take())
        };

        if let Some(closer) = subscription {
            closer.close();
        }
        if let Some(listener) = listener {
            listener.abort();
        }
        if let Some(outcome) = outcome {
            // Receiver gone means the caller stopped waiting.
            let _ = sender.send(outcome);
        }
        true
    }
}

/// In-flight calls keyed by correlation ID.
pub struct PendingCallTable<T> {
    pending: DashMap<CorrelationId, Arc<PendingCall<T>>>,
    stats: Arc<PendingStats>,
}

impl<T> PendingCallTable<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
            stats: Arc::new(PendingStats::default()),
        }
    }

    /// Register a call and get the receiver its outcome arrives on.
    pub fn register(
        &self,
        correlation_id: CorrelationId,
        timeout: Duration,
    ) -> (Arc<PendingCall<T>>, oneshot::Receiver<CallOutcome<T>>) {
        let (tx, rx) = oneshot::channel();
        let now = Instant::now();
        let call = Arc::new(PendingCall {
            correlation_id,
            deadline: now
                .checked_add(timeout)
                .unwrap_or_else(|| now + FAR_FUTURE),
            registered_at: now,
            state: Mutex::new(PendingState {
                sender: Some(tx),
                subscription: None,
                listener: None,
            }),
        });

        self.pending.insert(correlation_id, Arc::clone(&call));
        self.stats.total_registered.fetch_add(1, Ordering::Relaxed);

        debug!(
            correlation_id = %correlation_id,
            timeout_ms = timeout.as_millis() as u64,
            "Registered pending call"
        );

        (call, rx)
    }

    /// Settle a call with an outcome.
    ///
    /// Returns true if this was the settling attempt, false if the call was
    /// unknown or already settled.
    pub fn complete(&self, correlation_id: &CorrelationId, outcome: CallOutcome<T>) -> bool {
        let Some((_, call)) = self.pending.remove(correlation_id) else {
            debug!(
                correlation_id = %correlation_id,
                "Outcome for unknown or settled call"
            );
            return false;
        };

        let counter = match &outcome {
            Ok(_) => &self.stats.total_completed,
            Err(RpcError::RequestTimeout { .. } | RpcError::ReplyTimeout { .. }) => {
                &self.stats.total_timeouts
            }
            Err(_) => &self.stats.total_failed,
        };
        let elapsed = call.registered_at.elapsed();

        if !call.settle(Some(outcome)) {
            return false;
        }
        counter.fetch_add(1, Ordering::Relaxed);
        debug!(
            correlation_id = %correlation_id,
            elapsed_ms = elapsed.as_millis() as u64,
            "Settled pending call"
        );
        true
    }

    /// Release a call without resolving it.
    pub fn cancel(&self, correlation_id: &CorrelationId) -> bool {
        let Some((_, call)) = self.pending.remove(correlation_id) else {
            return false;
        };
        if !call.settle(None) {
            return false;
        }
        self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
        debug!(correlation_id = %correlation_id, "Cancelled pending call");
        true
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_pending(&self, correlation_id: &CorrelationId) -> bool {
        self.pending.contains_key(correlation_id)
    }

    #[must_use]
    pub fn stats(&self) -> &PendingStats {
        &self.stats
    }
}

impl<T> Default for PendingCallTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancels a call when the caller's future is dropped mid-flight.
pub struct CancelOnDrop<'a, T> {
    table: &'a PendingCallTable<T>,
    correlation_id: CorrelationId,
}

impl<'a, T> CancelOnDrop<'a, T> {
    #[must_use]
    pub fn new(table: &'a PendingCallTable<T>, correlation_id: CorrelationId) -> Self {
        Self {
            table,
            correlation_id,
        }
    }
}

impl<T> Drop for CancelOnDrop<'_, T> {
    fn drop(&mut self) {
        self.table.cancel(&self.correlation_id);
    }
}
