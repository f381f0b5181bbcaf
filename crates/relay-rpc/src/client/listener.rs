//! Long-lived plain message listener.

use crate::domain::error::RpcError;
use shared_relay::{Keys, MessageCrypto, PublicKey, Subscription, SubscriptionCloser};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A decrypted plain message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub text: String,
    pub sender: PublicKey,
    /// Sender's `created_at`, unix seconds
    pub timestamp: u64,
    pub message_id: String,
}

/// Handle to a running listener. Dropping it stops the listener.
#[must_use = "dropping the listener stops it"]
pub struct MessageListener {
    closer: SubscriptionCloser,
    task: JoinHandle<()>,
}

impl MessageListener {
    pub(crate) fn spawn<F, E>(
        mut subscription: Subscription,
        keys: Arc<Keys>,
        crypto: Arc<dyn MessageCrypto>,
        sender: PublicKey,
        on_message: F,
        on_error: E,
    ) -> Self
    where
        F: Fn(IncomingMessage) + Send + Sync + 'static,
        E: Fn(RpcError) + Send + Sync + 'static,
    {
        let closer = subscription.closer();
        let task = tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                if !event.is_addressed_to(keys.public_key()) || event.pubkey != sender {
                    continue;
                }
                match crypto
                    .decrypt(keys.secret_key(), &sender, &event.content)
                    .await
                {
                    Ok(text) => on_message(IncomingMessage {
                        text,
                        sender: event.pubkey.clone(),
                        timestamp: event.created_at,
                        message_id: event.id.clone(),
                    }),
                    Err(e) => {
                        warn!(
                            event_id = %event.short_id(),
                            sender = %sender.short(),
                            error = %e,
                            "Error decrypting message"
                        );
                        on_error(e.into());
                    }
                }
            }
            debug!(sender = %sender.short(), "Message listener exited");
        });
        Self { closer, task }
    }

    /// Stop listening. Idempotent.
    pub fn close(&self) {
        self.closer.close();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closer.is_closed()
    }
}

impl Drop for MessageListener {
    fn drop(&mut self) {
        self.closer.close();
        self.task.abort();
    }
}

impl std::fmt::Debug for MessageListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageListener")
            .field("subscription", &self.closer)
            .finish_non_exhaustive()
    }
}
