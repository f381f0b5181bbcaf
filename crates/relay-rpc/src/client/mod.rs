//! RPC client - correlated calls over a fire-and-forget transport.
//!
//! ## Call flow
//!
//! ```text
//! call(method, params)
//!   │ register PendingCall (deadline starts)
//!   │ seal request ──────────────┐
//!   │ open reply subscription    │  subscription first, so a fast
//!   │ spawn reply watcher        │  reply cannot be missed
//!   │ publish ◀──────────────────┘
//!   ▼
//! first of { matching reply, deadline, transport failure, caller dropped }
//!   settles the PendingCall, closes the subscription, stops the watcher
//! ```
//!
//! Replies are matched by the envelope `id`, never by arrival order, so
//! any number of calls can share the same relays concurrently.

pub mod filters;
pub mod listener;

pub use filters::{FilterBuilder, FilterContext, FilterOverrides};
pub use listener::{IncomingMessage, MessageListener};

use crate::domain::config::{ClientConfig, ConfigError};
use crate::domain::correlation::CorrelationId;
use crate::domain::envelope::{RpcRequest, RpcResponse};
use crate::domain::error::RpcError;
use crate::domain::pending::{CallOutcome, CancelOnDrop, PendingCall, PendingCallTable, PendingStats};
use crate::ports::{SystemTimeSource, TimeSource};
use crate::reply::ReplyEmitter;
use parking_lot::RwLock;
use serde_json::Value;
use shared_relay::{
    EndpointFailure, Keys, MessageCrypto, PublicKey, RelayError, RelayEvent, RelayFilter,
    RelayPool, Subscription, SubscriptionError, Tag, KIND_ENCRYPTED_DIRECT_MESSAGE,
};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Result of [`RpcClient::send_message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Published; no reply requested.
    Sent { timestamp: u64, message_id: String },
    /// The counterpart answered.
    Replied {
        reply: String,
        sender: PublicKey,
        /// Reply's `created_at`
        timestamp: u64,
        /// Reply's event id
        message_id: String,
    },
}

/// Client half of the protocol.
pub struct RpcClient {
    config: ClientConfig,
    keys: Arc<Keys>,
    pool: Arc<dyn RelayPool>,
    crypto: Arc<dyn MessageCrypto>,
    emitter: ReplyEmitter,
    tags: RwLock<Vec<Tag>>,
    filters: RwLock<FilterOverrides>,
    calls: Arc<PendingCallTable<Value>>,
    messages: Arc<PendingCallTable<SendOutcome>>,
}

impl RpcClient {
    /// Create a client identified by `keys`.
    pub fn new(
        config: ClientConfig,
        keys: Keys,
        pool: Arc<dyn RelayPool>,
        crypto: Arc<dyn MessageCrypto>,
    ) -> Result<Self, RpcError> {
        config.validate()?;
        let keys = Arc::new(keys);
        let emitter = ReplyEmitter::new(
            Arc::clone(&pool),
            Arc::clone(&crypto),
            Arc::clone(&keys),
            config.relays.clone(),
            Arc::new(SystemTimeSource),
        );

        Ok(Self {
            tags: RwLock::new(config.tags.clone()),
            config,
            keys,
            pool,
            crypto,
            emitter,
            filters: RwLock::new(FilterOverrides::default()),
            calls: Arc::new(PendingCallTable::new()),
            messages: Arc::new(PendingCallTable::new()),
        })
    }

    /// Stamp outbound events with `time` instead of the system clock.
    #[must_use]
    pub fn with_time_source(mut self, time: Arc<dyn TimeSource>) -> Self {
        self.emitter = ReplyEmitter::new(
            Arc::clone(&self.pool),
            Arc::clone(&self.crypto),
            Arc::clone(&self.keys),
            self.config.relays.clone(),
            time,
        );
        self
    }

    #[must_use]
    pub fn public_key(&self) -> &PublicKey {
        self.keys.public_key()
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Replace the extra tags appended to every outbound event.
    pub fn set_tags(&self, tags: Vec<Tag>) -> Result<(), ConfigError> {
        if let Some(tag) = tags.iter().find(|tag| tag.is_empty()) {
            return Err(ConfigError::Invalid(format!("empty tag: {tag:?}")));
        }
        *self.tags.write() = tags;
        Ok(())
    }

    /// Builder for `call` reply subscriptions; `None` restores the default.
    pub fn set_reply_filter(&self, builder: Option<FilterBuilder>) {
        self.filters.write().reply = builder;
    }

    /// Builder for `send_message` reply subscriptions. Falls back to the
    /// reply builder when unset.
    pub fn set_message_reply_filter(&self, builder: Option<FilterBuilder>) {
        self.filters.write().message_reply = builder;
    }

    /// Builder for `listen_for_messages` subscriptions.
    pub fn set_incoming_filter(&self, builder: Option<FilterBuilder>) {
        self.filters.write().incoming = builder;
    }

    /// Calls and waiting messages currently in flight.
    #[must_use]
    pub fn pending_calls(&self) -> usize {
        self.calls.pending_count() + self.messages.pending_count()
    }

    #[must_use]
    pub fn call_stats(&self) -> &PendingStats {
        self.calls.stats()
    }

    #[must_use]
    pub fn message_stats(&self) -> &PendingStats {
        self.messages.stats()
    }

    /// Close the connections to every configured relay.
    pub async fn close(&self) {
        self.pool.close(&self.config.relays).await;
        info!(relays = self.config.relays.len(), "Client closed");
    }

    // ------------------------------------------------------------------
    // call
    // ------------------------------------------------------------------

    /// Invoke `method` on the configured server and wait for its reply.
    ///
    /// # Errors
    ///
    /// - `RequestTimeout` when no matching reply arrives in time
    /// - `RemoteError` when the reply carries an error
    /// - transport and crypto failures as they occurred
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let server = self
            .config
            .server_public_key
            .clone()
            .ok_or(ConfigError::MissingServerKey)?;

        let correlation_id = CorrelationId::new();
        let (call, rx) = self.calls.register(correlation_id, self.config.timeout);
        let _cancel = CancelOnDrop::new(&self.calls, correlation_id);

        if let Err(e) = self.start_call(&call, &server, method, params).await {
            warn!(correlation_id = %correlation_id, method = %method, error = %e, "Call failed");
            self.calls.complete(&correlation_id, Err(e));
        }

        let timeout = RpcError::RequestTimeout {
            timeout_ms: self.config.timeout.as_millis() as u64,
        };
        await_outcome(&self.calls, &call, rx, timeout).await
    }

    async fn start_call(
        &self,
        call: &PendingCall<Value>,
        server: &PublicKey,
        method: &str,
        params: Value,
    ) -> Result<(), RpcError> {
        let correlation_id = call.correlation_id();
        let request = RpcRequest::new(method, params, correlation_id);
        let payload = serde_json::to_string(&request)?;
        let tags = self.tags.read().clone();
        let event = self.emitter.seal(server, &payload, None, &tags).await?;

        let context = FilterContext::Call {
            method: request.method,
            params: request.params,
            request_id: correlation_id.to_string(),
        };
        let subscription = self
            .reply_subscription(server, &event, &context)
            .await?;
        call.attach_subscription(subscription.closer());

        let watcher = tokio::spawn(watch_call_replies(
            subscription,
            ReplyWatch {
                keys: Arc::clone(&self.keys),
                crypto: Arc::clone(&self.crypto),
                counterpart: server.clone(),
            },
            Arc::clone(&self.calls),
            correlation_id,
        ));
        call.attach_listener(watcher.abort_handle());

        self.emitter.publish(&event).await?;
        debug!(
            correlation_id = %correlation_id,
            method = %method,
            event_id = %event.short_id(),
            "Request sent"
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // send_message
    // ------------------------------------------------------------------

    /// Send a plain encrypted message to `recipient`.
    ///
    /// With `wait_for_reply`, resolves with the first message from
    /// `recipient` that references the sent one, or carries no reference at
    /// all unless `strict_reply_reference` is set.
    pub async fn send_message(
        &self,
        content: &str,
        recipient: &PublicKey,
        wait_for_reply: bool,
    ) -> Result<SendOutcome, RpcError> {
        let tags = self.tags.read().clone();
        let event = self.emitter.seal(recipient, content, None, &tags).await?;

        if !wait_for_reply {
            self.emitter.publish(&event).await?;
            debug!(
                event_id = %event.short_id(),
                recipient = %recipient.short(),
                "Message sent"
            );
            return Ok(SendOutcome::Sent {
                timestamp: event.created_at,
                message_id: event.id,
            });
        }

        let key = CorrelationId::new();
        let (pending, rx) = self.messages.register(key, self.config.timeout);
        let _cancel = CancelOnDrop::new(&self.messages, key);

        if let Err(e) = self.start_message_wait(&pending, recipient, &event).await {
            warn!(recipient = %recipient.short(), error = %e, "Error sending message");
            self.messages.complete(&key, Err(e));
        }

        let timeout = RpcError::ReplyTimeout {
            timeout_ms: self.config.timeout.as_millis() as u64,
        };
        await_outcome(&self.messages, &pending, rx, timeout).await
    }

    async fn start_message_wait(
        &self,
        pending: &PendingCall<SendOutcome>,
        recipient: &PublicKey,
        event: &RelayEvent,
    ) -> Result<(), RpcError> {
        let context = FilterContext::MessageReply {
            recipient: recipient.clone(),
            sent_event_id: event.id.clone(),
            sent_timestamp: event.created_at,
        };
        let subscription = self
            .reply_subscription(recipient, event, &context)
            .await?;
        pending.attach_subscription(subscription.closer());

        let watcher = tokio::spawn(watch_message_replies(
            subscription,
            ReplyWatch {
                keys: Arc::clone(&self.keys),
                crypto: Arc::clone(&self.crypto),
                counterpart: recipient.clone(),
            },
            MessageWait {
                sent_event_id: event.id.clone(),
                strict: self.config.strict_reply_reference,
            },
            Arc::clone(&self.messages),
            pending.correlation_id(),
        ));
        pending.attach_listener(watcher.abort_handle());

        self.emitter.publish(event).await?;
        debug!(
            event_id = %event.short_id(),
            recipient = %recipient.short(),
            "Message sent, waiting for reply"
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // listen_for_messages
    // ------------------------------------------------------------------

    /// Deliver every message from `sender` to `on_message` until the
    /// returned listener is closed or dropped.
    ///
    /// Messages that fail to decrypt are reported to `on_error`.
    pub async fn listen_for_messages<F, E>(
        &self,
        sender: &PublicKey,
        on_message: F,
        on_error: E,
    ) -> Result<MessageListener, RpcError>
    where
        F: Fn(IncomingMessage) + Send + Sync + 'static,
        E: Fn(RpcError) + Send + Sync + 'static,
    {
        let base = RelayFilter::all()
            .kind(KIND_ENCRYPTED_DIRECT_MESSAGE)
            .recipient(self.keys.public_key().clone())
            .author(sender.clone());
        let context = FilterContext::Incoming {
            sender: sender.clone(),
        };
        let filter = self.filters.read().build(base, &context);
        let subscription = self.pool.subscribe(&self.config.relays, filter).await?;

        debug!(sender = %sender.short(), "Listening for messages");
        Ok(MessageListener::spawn(
            subscription,
            Arc::clone(&self.keys),
            Arc::clone(&self.crypto),
            sender.clone(),
            on_message,
            on_error,
        ))
    }

    /// Open the subscription a reply to `sent` will arrive on.
    async fn reply_subscription(
        &self,
        counterpart: &PublicKey,
        sent: &RelayEvent,
        context: &FilterContext,
    ) -> Result<Subscription, RpcError> {
        let since = sent
            .created_at
            .saturating_sub(self.config.reply_since_skew.as_secs());
        let base = RelayFilter::all()
            .kind(KIND_ENCRYPTED_DIRECT_MESSAGE)
            .recipient(self.keys.public_key().clone())
            .author(counterpart.clone())
            .since(since);
        let filter = self.filters.read().build(base, context);
        match self.pool.subscribe(&self.config.relays, filter).await {
            Ok(subscription) => Ok(subscription),
            // No relay takes the reply subscription, so none would carry the request
            Err(SubscriptionError::Rejected(_)) => Err(RelayError::AllRejected {
                failures: self
                    .config
                    .relays
                    .iter()
                    .map(|relay| EndpointFailure {
                        relay: relay.clone(),
                        reason: "subscription rejected".into(),
                    })
                    .collect(),
            }
            .into()),
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("public_key", self.keys.public_key())
            .field("config", &self.config)
            .field("pending", &self.pending_calls())
            .finish_non_exhaustive()
    }
}

/// Wait for a pending call to settle, settling it with `timeout` once its
/// deadline passes.
async fn await_outcome<T>(
    table: &PendingCallTable<T>,
    call: &PendingCall<T>,
    mut rx: oneshot::Receiver<CallOutcome<T>>,
    timeout: RpcError,
) -> Result<T, RpcError> {
    match tokio::time::timeout_at(call.deadline(), &mut rx).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(_)) => Err(RpcError::Cancelled),
        Err(_) => {
            if table.complete(&call.correlation_id(), Err(timeout)) {
                debug!(correlation_id = %call.correlation_id(), "Call timed out");
            }
            // A reply that won the race is still in the channel.
            rx.await.unwrap_or(Err(RpcError::Cancelled))
        }
    }
}

/// Who a reply watcher decrypts for.
struct ReplyWatch {
    keys: Arc<Keys>,
    crypto: Arc<dyn MessageCrypto>,
    counterpart: PublicKey,
}

impl ReplyWatch {
    /// Routing check plus decryption. Decryption failures are logged.
    async fn open(&self, event: &RelayEvent) -> Option<String> {
        if !event.is_addressed_to(self.keys.public_key()) || event.pubkey != self.counterpart {
            debug!(event_id = %event.short_id(), "Skipping: recipient or author mismatch");
            return None;
        }
        match self
            .crypto
            .decrypt(self.keys.secret_key(), &self.counterpart, &event.content)
            .await
        {
            Ok(plaintext) => Some(plaintext),
            Err(e) => {
                warn!(event_id = %event.short_id(), error = %e, "Error decrypting reply");
                None
            }
        }
    }
}

async fn watch_call_replies(
    mut subscription: Subscription,
    watch: ReplyWatch,
    calls: Arc<PendingCallTable<Value>>,
    correlation_id: CorrelationId,
) {
    while let Some(event) = subscription.recv().await {
        let Some(plaintext) = watch.open(&event).await else {
            continue;
        };
        let response: RpcResponse = match serde_json::from_str(&plaintext) {
            Ok(response) => response,
            Err(e) => {
                warn!(event_id = %event.short_id(), error = %e, "Unparseable reply");
                continue;
            }
        };
        if !correlation_id.matches(&response.id) {
            continue;
        }
        calls.complete(&correlation_id, response.into_result());
        return;
    }
}

/// Back-reference rules for a message reply.
struct MessageWait {
    sent_event_id: String,
    strict: bool,
}

async fn watch_message_replies(
    mut subscription: Subscription,
    watch: ReplyWatch,
    wait: MessageWait,
    messages: Arc<PendingCallTable<SendOutcome>>,
    key: CorrelationId,
) {
    while let Some(event) = subscription.recv().await {
        match event.reference() {
            Some(reference) if reference != wait.sent_event_id => {
                debug!(
                    event_id = %event.short_id(),
                    reference = %reference,
                    "Skipping: reply references another message"
                );
                continue;
            }
            None if wait.strict => {
                debug!(event_id = %event.short_id(), "Skipping: reply has no back-reference");
                continue;
            }
            None => {
                warn!(event_id = %event.short_id(), "Reply has no back-reference, accepting");
            }
            Some(_) => {}
        }

        let Some(reply) = watch.open(&event).await else {
            continue;
        };
        let outcome = SendOutcome::Replied {
            reply,
            sender: event.pubkey.clone(),
            timestamp: event.created_at,
            message_id: event.id.clone(),
        };
        messages.complete(&key, Ok(outcome));
        return;
    }
}
