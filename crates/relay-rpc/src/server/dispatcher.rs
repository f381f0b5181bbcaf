//! Routes inbound events to immediate processing or storage.

use crate::domain::config::ProcessingMode;
use crate::domain::error::RpcError;
use crate::server::processor::EventProcessor;
use crate::server::storage::EventStorage;
use crate::whitelist::WhitelistStore;
use shared_relay::{PublicKey, RelayEvent};
use std::sync::Arc;
use tracing::{debug, error, info};

/// What happened to one inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Not addressed to this server.
    Ignored,
    /// Sender excluded by the global whitelist.
    Rejected,
    /// Processed inline; carries the processing result.
    Processed(Result<(), RpcError>),
    /// Stored for the queue processor.
    Enqueued { storage_id: String },
    /// Storage refused the event.
    EnqueueFailed(String),
}

pub struct EventDispatcher {
    public_key: PublicKey,
    whitelist: Arc<WhitelistStore>,
    mode: ProcessingMode,
    storage: Arc<dyn EventStorage>,
    processor: Arc<EventProcessor>,
}

impl EventDispatcher {
    pub fn new(
        public_key: PublicKey,
        whitelist: Arc<WhitelistStore>,
        mode: ProcessingMode,
        storage: Arc<dyn EventStorage>,
        processor: Arc<EventProcessor>,
    ) -> Self {
        Self {
            public_key,
            whitelist,
            mode,
            storage,
            processor,
        }
    }

    #[must_use]
    pub fn mode(&self) -> ProcessingMode {
        self.mode
    }

    /// Filter one event and hand it on according to the processing mode.
    pub async fn on_event(&self, event: RelayEvent) -> Dispatch {
        if !event.is_addressed_to(&self.public_key) {
            debug!(event_id = %event.short_id(), "Event not addressed to us");
            return Dispatch::Ignored;
        }

        if !self.whitelist.is_allowed(&event.pubkey).await {
            info!(
                event_id = %event.short_id(),
                sender = %event.pubkey.short(),
                "Sender not in whitelist"
            );
            return Dispatch::Rejected;
        }

        match self.mode {
            ProcessingMode::Immediate => Dispatch::Processed(self.processor.process(&event).await),
            ProcessingMode::Queued => {
                let event_id = event.short_id().to_string();
                match self.storage.enqueue(event).await {
                    Ok(storage_id) => {
                        debug!(event_id = %event_id, storage_id = %storage_id, "Event enqueued");
                        Dispatch::Enqueued { storage_id }
                    }
                    Err(e) => {
                        error!(event_id = %event_id, error = %e, "Failed to enqueue event");
                        Dispatch::EnqueueFailed(e.to_string())
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("public_key", &self.public_key)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}
