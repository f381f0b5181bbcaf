//! # Relay Pool
//!
//! The transport port used by clients and servers, plus an in-process
//! implementation.
//!
//! ## Publish semantics
//!
//! An event is offered to every listed endpoint. The publish succeeds when
//! at least one endpoint accepts it; per-endpoint failures are reported in
//! the [`PublishReceipt`]. If no endpoint accepts, the call fails with
//! [`RelayError::AllRejected`].

use crate::event::RelayEvent;
use crate::filter::RelayFilter;
use crate::subscription::{
    Subscription, SubscriptionCloser, SubscriptionError, SubscriptionRegistry,
};
use crate::DEFAULT_CHANNEL_CAPACITY;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// A single endpoint that did not take an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointFailure {
    pub relay: String,
    pub reason: String,
}

impl std::fmt::Display for EndpointFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.relay, self.reason)
    }
}

/// Outcome of a successful publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub event_id: String,
    /// Endpoints that accepted the event.
    pub accepted: Vec<String>,
    /// Endpoints that refused or were unreachable.
    pub failures: Vec<EndpointFailure>,
}

/// Errors from relay operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("No relays configured")]
    NoRelays,

    #[error("Event rejected by all relays: {}", format_failures(.failures))]
    AllRejected { failures: Vec<EndpointFailure> },
}

fn format_failures(failures: &[EndpointFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Relay transport consumed by the RPC client and server.
#[async_trait]
pub trait RelayPool: Send + Sync {
    /// Publish an event to the given endpoints.
    async fn publish(
        &self,
        relays: &[String],
        event: &RelayEvent,
    ) -> Result<PublishReceipt, RelayError>;

    /// Open one subscription fed by all given endpoints.
    async fn subscribe(
        &self,
        relays: &[String],
        filter: RelayFilter,
    ) -> Result<Subscription, SubscriptionError>;

    /// Release this pool's connections to the given endpoints, ending the
    /// subscriptions it opened on them.
    async fn close(&self, relays: &[String]);
}

struct RelayState {
    sender: broadcast::Sender<RelayEvent>,
    online: bool,
    published: u64,
}

impl RelayState {
    fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            online: true,
            published: 0,
        }
    }
}

/// Relays shared by every handle of one in-memory network.
struct Network {
    relays: RwLock<HashMap<String, RelayState>>,
    registry: Arc<SubscriptionRegistry>,
    capacity: usize,
    total_published: AtomicU64,
}

/// In-process relay pool.
///
/// Endpoints are created on first use. Every endpoint is an independent
/// broadcast channel, so a subscriber on two endpoints that both carry an
/// event receives it twice at the transport level and once from
/// [`Subscription::recv`].
///
/// A pool is one party's connection to an in-memory network of relays.
/// [`InMemoryRelayPool::connect`] gives another party its own connection to
/// the same relays; [`RelayPool::close`] only ends subscriptions opened
/// through the handle it is called on.
///
/// Endpoints can be taken offline with [`InMemoryRelayPool::set_online`] to
/// simulate partial outages.
pub struct InMemoryRelayPool {
    network: Arc<Network>,
    /// Subscriptions opened through this handle, with their endpoints
    owned: Mutex<Vec<(Vec<String>, SubscriptionCloser)>>,
}

impl InMemoryRelayPool {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a pool whose endpoints buffer `capacity` events.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            network: Arc::new(Network {
                relays: RwLock::new(HashMap::new()),
                registry: Arc::new(SubscriptionRegistry::new()),
                capacity: capacity.max(1),
                total_published: AtomicU64::new(0),
            }),
            owned: Mutex::new(Vec::new()),
        }
    }

    /// A separate connection to the same relays.
    #[must_use]
    pub fn connect(&self) -> Self {
        Self {
            network: Arc::clone(&self.network),
            owned: Mutex::new(Vec::new()),
        }
    }

    /// Take an endpoint offline or bring it back.
    pub fn set_online(&self, relay: &str, online: bool) {
        let mut relays = self.network.relays.write();
        let state = relays
            .entry(relay.to_string())
            .or_insert_with(|| RelayState::new(self.network.capacity));
        state.online = online;
        debug!(relay = %relay, online, "Relay availability changed");
    }

    /// Current subscriber count on one endpoint.
    #[must_use]
    pub fn subscriber_count(&self, relay: &str) -> usize {
        self.network
            .relays
            .read()
            .get(relay)
            .map_or(0, |state| state.sender.receiver_count())
    }

    /// Events accepted by one endpoint.
    #[must_use]
    pub fn events_published(&self, relay: &str) -> u64 {
        self.network
            .relays
            .read()
            .get(relay)
            .map_or(0, |state| state.published)
    }

    /// Events accepted across all endpoints.
    #[must_use]
    pub fn total_published(&self) -> u64 {
        self.network.total_published.load(Ordering::Relaxed)
    }

    /// Subscriptions opened on this network and not yet closed, across
    /// every connected handle.
    #[must_use]
    pub fn active_subscriptions(&self) -> usize {
        self.network.registry.active_count()
    }
}

impl Default for InMemoryRelayPool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RelayPool for InMemoryRelayPool {
    async fn publish(
        &self,
        relays: &[String],
        event: &RelayEvent,
    ) -> Result<PublishReceipt, RelayError> {
        if relays.is_empty() {
            return Err(RelayError::NoRelays);
        }

        let mut accepted = Vec::new();
        let mut failures = Vec::new();
        {
            let mut map = self.network.relays.write();
            for relay in relays {
                let state = map
                    .entry(relay.clone())
                    .or_insert_with(|| RelayState::new(self.network.capacity));
                if !state.online {
                    failures.push(EndpointFailure {
                        relay: relay.clone(),
                        reason: "relay unreachable".into(),
                    });
                    continue;
                }
                // No subscribers is still an accepted publish.
                let _ = state.sender.send(event.clone());
                state.published += 1;
                accepted.push(relay.clone());
            }
        }

        if accepted.is_empty() {
            warn!(event_id = %event.short_id(), "Event rejected by all relays");
            return Err(RelayError::AllRejected { failures });
        }

        self.network.total_published.fetch_add(1, Ordering::Relaxed);
        debug!(
            event_id = %event.short_id(),
            accepted = accepted.len(),
            failed = failures.len(),
            "Event published"
        );
        Ok(PublishReceipt {
            event_id: event.id.clone(),
            accepted,
            failures,
        })
    }

    async fn subscribe(
        &self,
        relays: &[String],
        filter: RelayFilter,
    ) -> Result<Subscription, SubscriptionError> {
        if relays.is_empty() {
            return Err(SubscriptionError::NoRelays);
        }

        let receivers: Vec<_> = {
            let mut map = self.network.relays.write();
            relays
                .iter()
                .filter_map(|relay| {
                    let state = map
                        .entry(relay.clone())
                        .or_insert_with(|| RelayState::new(self.network.capacity));
                    state
                        .online
                        .then(|| (relay.clone(), state.sender.subscribe()))
                })
                .collect()
        };

        if receivers.is_empty() {
            return Err(SubscriptionError::Rejected(relays.join(", ")));
        }

        let endpoints: Vec<String> = receivers.iter().map(|(relay, _)| relay.clone()).collect();
        let subscription =
            Subscription::new(receivers, filter, Arc::clone(&self.network.registry));
        {
            let mut owned = self.owned.lock();
            owned.retain(|(_, closer)| !closer.is_closed());
            owned.push((endpoints, subscription.closer()));
        }

        debug!(
            subscription = subscription.closer().id(),
            relays = relays.len(),
            "Subscription opened"
        );
        Ok(subscription)
    }

    async fn close(&self, relays: &[String]) {
        let closing: Vec<SubscriptionCloser> = {
            let mut owned = self.owned.lock();
            let (touched, kept): (Vec<_>, Vec<_>) = owned
                .drain(..)
                .partition(|(endpoints, _)| endpoints.iter().any(|e| relays.contains(e)));
            *owned = kept;
            touched.into_iter().map(|(_, closer)| closer).collect()
        };

        for closer in &closing {
            closer.close();
        }
        debug!(
            relays = relays.len(),
            subscriptions = closing.len(),
            "Relay connections closed"
        );
    }
}
