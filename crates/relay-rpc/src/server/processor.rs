//! Decrypted-event processing, shared by immediate and queued modes.
//!
//! Every failure after decryption ends in exactly one error reply:
//!
//! | Failure              | Reply `error`                         | Reply `id` |
//! |----------------------|---------------------------------------|------------|
//! | payload not JSON     | `Invalid JSON format`                 | `null`     |
//! | no `method`          | `Missing method field`                | `null`     |
//! | unknown method       | `Method not found: <name>`            | echoed     |
//! | authorization        | `Permission denied for method: <name>`| echoed     |
//! | handler error        | the handler's message                 | echoed     |
//!
//! Decryption failures get no reply and are only logged.

use crate::auth::check_permission;
use crate::domain::envelope::{RpcRequest, RpcResponse};
use crate::domain::error::RpcError;
use crate::lifecycle::{Lifecycle, LifecycleEvent};
use crate::registry::{CallContext, MethodRegistry};
use crate::reply::ReplyEmitter;
use crate::server::storage::StoredEvent;
use crate::whitelist::WhitelistStore;
use shared_relay::{Keys, MessageCrypto, RelayEvent};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Turns one inbound request event into one reply.
pub struct EventProcessor {
    registry: Arc<MethodRegistry>,
    whitelist: Arc<WhitelistStore>,
    crypto: Arc<dyn MessageCrypto>,
    keys: Arc<Keys>,
    emitter: ReplyEmitter,
    lifecycle: Lifecycle,
}

impl EventProcessor {
    pub fn new(
        registry: Arc<MethodRegistry>,
        whitelist: Arc<WhitelistStore>,
        crypto: Arc<dyn MessageCrypto>,
        keys: Arc<Keys>,
        emitter: ReplyEmitter,
        lifecycle: Lifecycle,
    ) -> Self {
        Self {
            registry,
            whitelist,
            crypto,
            keys,
            emitter,
            lifecycle,
        }
    }

    /// Process a dequeued event, re-checking the whitelist first.
    ///
    /// The sender may have been removed while the event waited in storage.
    pub async fn process_stored(&self, stored: &StoredEvent) -> Result<(), RpcError> {
        if !self.whitelist.is_allowed(&stored.event.pubkey).await {
            info!(
                storage_id = %stored.storage_id,
                sender = %stored.event.pubkey.short(),
                "Queued sender no longer whitelisted"
            );
            return Err(RpcError::SenderNotAllowed);
        }
        self.process(&stored.event).await
    }

    /// Decrypt, route, authorize, invoke and reply.
    ///
    /// Returns the failure that was answered, so queued processing can
    /// acknowledge it.
    pub async fn process(&self, event: &RelayEvent) -> Result<(), RpcError> {
        let plaintext = match self
            .crypto
            .decrypt(self.keys.secret_key(), &event.pubkey, &event.content)
            .await
        {
            Ok(plaintext) => plaintext,
            Err(e) => {
                warn!(
                    event_id = %event.short_id(),
                    sender = %event.pubkey.short(),
                    error = %e,
                    "Failed to decrypt request"
                );
                return Err(e.into());
            }
        };

        let request = match RpcRequest::parse(&plaintext) {
            Ok(request) => request,
            Err((err, id)) => {
                debug!(event_id = %event.short_id(), error = %err, "Malformed request");
                self.reply(event, RpcResponse::failure(id, err.to_string()))
                    .await;
                return Err(err);
            }
        };

        let Some(method) = self.registry.get(&request.method) else {
            let err = RpcError::MethodNotFound(request.method);
            self.reply(event, RpcResponse::failure(request.id, err.to_string()))
                .await;
            return Err(err);
        };

        if !check_permission(&method.auth, &event.pubkey, &self.whitelist).await {
            let err = RpcError::PermissionDenied(request.method);
            self.reply(event, RpcResponse::failure(request.id, err.to_string()))
                .await;
            return Err(err);
        }

        let ctx = CallContext {
            params: request.params,
            event: event.clone(),
            message_id: event.id.clone(),
            sender: event.pubkey.clone(),
        };

        match method.handler.handle(ctx).await {
            Ok(result) => {
                debug!(
                    event_id = %event.short_id(),
                    method = %method.name,
                    "Request handled"
                );
                self.reply(event, RpcResponse::success(request.id, result))
                    .await;
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                warn!(
                    event_id = %event.short_id(),
                    method = %method.name,
                    error = %message,
                    "Handler failed"
                );
                self.reply(event, RpcResponse::failure(request.id, message.clone()))
                    .await;
                Err(RpcError::HandlerFailed(message))
            }
        }
    }

    /// Send a reply; failures are reported through the lifecycle channel.
    async fn reply(&self, request: &RelayEvent, response: RpcResponse) {
        if let Err(e) = self
            .emitter
            .emit_json(&request.pubkey, &response, Some(&request.id))
            .await
        {
            error!(
                event_id = %request.short_id(),
                recipient = %request.pubkey.short(),
                error = %e,
                "Error sending reply"
            );
            self.lifecycle
                .emit(LifecycleEvent::Error(format!("Error sending reply: {e}")));
        }
    }
}

impl std::fmt::Debug for EventProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventProcessor")
            .field("methods", &self.registry.len())
            .field("emitter", &self.emitter)
            .finish_non_exhaustive()
    }
}
