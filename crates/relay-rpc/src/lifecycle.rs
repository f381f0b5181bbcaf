//! Server lifecycle signals.

use tokio::sync::broadcast;
use tracing::debug;

const LIFECYCLE_CAPACITY: usize = 64;

/// Observable server state changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Started,
    Stopped,
    /// A non-fatal failure, e.g. a reply no relay accepted.
    Error(String),
}

/// Broadcasts lifecycle events to any number of observers.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl Lifecycle {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(LIFECYCLE_CAPACITY);
        Self { sender }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: LifecycleEvent) {
        debug!(event = ?event, observers = self.sender.receiver_count(), "Lifecycle event");
        // Nobody listening is fine.
        let _ = self.sender.send(event);
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
