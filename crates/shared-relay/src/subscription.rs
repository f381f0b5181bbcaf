//! # Relay Subscriptions
//!
//! A [`Subscription`] merges the event streams of every relay it was opened
//! on into one inbound sequence. Events are filtered and deduplicated by id
//! before they are surfaced, so an event carried by three relays is seen once.
//!
//! Closing is idempotent and may come from any task through a
//! [`SubscriptionCloser`]. A pending [`Subscription::recv`] returns `None`
//! once the subscription is closed.

use crate::event::RelayEvent;
use crate::filter::RelayFilter;
use crate::seen_cache::SeenEventCache;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, Notify};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{StreamExt, StreamMap};
use tracing::debug;

/// Errors from subscription operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// No relay endpoints were given.
    #[error("No relays to subscribe to")]
    NoRelays,

    /// Every endpoint refused the subscription.
    #[error("Subscription rejected by all relays: {0}")]
    Rejected(String),

    /// The pool was closed.
    #[error("Relay pool closed")]
    Closed,
}

/// Tracks open subscriptions so their release can be observed.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    next_id: AtomicU64,
    active: Mutex<HashSet<u64>>,
}

impl SubscriptionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.active.lock().insert(id);
        id
    }

    fn release(&self, id: u64) {
        self.active.lock().remove(&id);
    }

    /// Number of subscriptions not yet closed.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }
}

struct CloserInner {
    id: u64,
    closed: AtomicBool,
    notify: Notify,
    registry: Arc<SubscriptionRegistry>,
}

/// Cloneable handle that closes a subscription from anywhere.
#[derive(Clone)]
pub struct SubscriptionCloser {
    inner: Arc<CloserInner>,
}

impl SubscriptionCloser {
    fn new(registry: Arc<SubscriptionRegistry>) -> Self {
        let id = registry.register();
        Self {
            inner: Arc::new(CloserInner {
                id,
                closed: AtomicBool::new(false),
                notify: Notify::new(),
                registry,
            }),
        }
    }

    /// Close the subscription. Calling this more than once is a no-op.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.registry.release(self.inner.id);
        self.inner.notify.notify_one();
        debug!(subscription = self.inner.id, "Subscription closed");
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Registry-assigned id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }
}

impl std::fmt::Debug for SubscriptionCloser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionCloser")
            .field("id", &self.inner.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A subscription handle for receiving events.
///
/// When dropped, the subscription is closed.
pub struct Subscription {
    streams: StreamMap<String, BroadcastStream<RelayEvent>>,
    filter: RelayFilter,
    seen: SeenEventCache,
    closer: SubscriptionCloser,
}

impl Subscription {
    pub(crate) fn new(
        receivers: Vec<(String, broadcast::Receiver<RelayEvent>)>,
        filter: RelayFilter,
        registry: Arc<SubscriptionRegistry>,
    ) -> Self {
        let mut streams = StreamMap::new();
        for (relay, receiver) in receivers {
            streams.insert(relay, BroadcastStream::new(receiver));
        }
        Self {
            streams,
            filter,
            seen: SeenEventCache::new(),
            closer: SubscriptionCloser::new(registry),
        }
    }

    /// Receive the next event that matches the filter.
    ///
    /// # Returns
    ///
    /// - `Some(event)` - The next matching event not seen before
    /// - `None` - The subscription was closed or every relay went away
    pub async fn recv(&mut self) -> Option<RelayEvent> {
        loop {
            if self.closer.is_closed() {
                return None;
            }

            let next = tokio::select! {
                biased;
                () = self.closer.inner.notify.notified() => continue,
                next = self.streams.next() => next,
            };

            let (relay, event) = match next? {
                (relay, Ok(event)) => (relay, event),
                (relay, Err(BroadcastStreamRecvError::Lagged(count))) => {
                    debug!(relay = %relay, lagged = count, "Subscriber lagged, some events dropped");
                    continue;
                }
            };

            if !self.filter.matches(&event) {
                continue;
            }
            if !self.seen.insert(&event.id, event.created_at) {
                debug!(relay = %relay, event_id = %event.short_id(), "Duplicate delivery skipped");
                continue;
            }
            return Some(event);
        }
    }

    /// Handle that closes this subscription from another task.
    #[must_use]
    pub fn closer(&self) -> SubscriptionCloser {
        self.closer.clone()
    }

    /// Close the subscription. Idempotent.
    pub fn close(&self) {
        self.closer.close();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closer.is_closed()
    }

    #[must_use]
    pub fn filter(&self) -> &RelayFilter {
        &self.filter
    }

    /// Number of relays still feeding this subscription.
    #[must_use]
    pub fn relay_count(&self) -> usize {
        self.streams.len()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.closer.close();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.closer.id())
            .field("relays", &self.streams.len())
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}
