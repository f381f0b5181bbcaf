//! Outbound message emission shared by the client and the server.
//!
//! Serialize → encrypt for the recipient → sign → publish to every relay.
//! A publish succeeds when one relay accepts; the others' failures are
//! logged and returned in the receipt.

use crate::domain::error::RpcError;
use crate::ports::TimeSource;
use serde::Serialize;
use shared_relay::{
    Keys, MessageCrypto, PublicKey, PublishReceipt, RelayEvent, RelayPool, Tag, UnsignedEvent,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Encrypts, signs and publishes direct messages as one identity.
#[derive(Clone)]
pub struct ReplyEmitter {
    pool: Arc<dyn RelayPool>,
    crypto: Arc<dyn MessageCrypto>,
    keys: Arc<Keys>,
    relays: Arc<[String]>,
    time: Arc<dyn TimeSource>,
}

impl ReplyEmitter {
    pub fn new(
        pool: Arc<dyn RelayPool>,
        crypto: Arc<dyn MessageCrypto>,
        keys: Arc<Keys>,
        relays: Vec<String>,
        time: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            pool,
            crypto,
            keys,
            relays: relays.into(),
            time,
        }
    }

    #[must_use]
    pub fn public_key(&self) -> &PublicKey {
        self.keys.public_key()
    }

    #[must_use]
    pub fn relays(&self) -> &[String] {
        &self.relays
    }

    /// Build a signed, encrypted direct message without publishing it.
    ///
    /// The routing tag comes first, then `reply_to` as an `e` tag, then
    /// `extra_tags`.
    pub async fn seal(
        &self,
        recipient: &PublicKey,
        plaintext: &str,
        reply_to: Option<&str>,
        extra_tags: &[Tag],
    ) -> Result<RelayEvent, RpcError> {
        let content = self
            .crypto
            .encrypt(self.keys.secret_key(), recipient, plaintext)
            .await?;

        let mut unsigned = UnsignedEvent::direct_message(
            self.keys.public_key().clone(),
            recipient,
            content,
            self.time.now(),
        );
        if let Some(event_id) = reply_to {
            unsigned = unsigned.in_reply_to(event_id);
        }
        let unsigned = unsigned.with_tags(extra_tags.iter().cloned());

        Ok(self.crypto.sign(unsigned, self.keys.secret_key())?)
    }

    /// Publish a sealed event to every configured relay.
    pub async fn publish(&self, event: &RelayEvent) -> Result<PublishReceipt, RpcError> {
        let receipt = self.pool.publish(&self.relays, event).await?;
        for failure in &receipt.failures {
            warn!(
                event_id = %event.short_id(),
                relay = %failure.relay,
                reason = %failure.reason,
                "Relay rejected event"
            );
        }
        Ok(receipt)
    }

    /// Serialize `payload` as JSON and deliver it to `recipient`.
    pub async fn emit_json<T: Serialize + ?Sized>(
        &self,
        recipient: &PublicKey,
        payload: &T,
        reply_to: Option<&str>,
    ) -> Result<RelayEvent, RpcError> {
        let plaintext = serde_json::to_string(payload)?;
        let event = self.seal(recipient, &plaintext, reply_to, &[]).await?;
        self.publish(&event).await?;
        debug!(
            event_id = %event.short_id(),
            recipient = %recipient.short(),
            "Replied"
        );
        Ok(event)
    }
}

impl std::fmt::Debug for ReplyEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyEmitter")
            .field("public_key", self.keys.public_key())
            .field("relays", &self.relays)
            .finish_non_exhaustive()
    }
}
