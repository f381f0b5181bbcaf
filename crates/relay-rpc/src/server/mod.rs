//! RPC server - listens for encrypted requests and replies to them.
//!
//! ## Pipeline
//!
//! ```text
//! Subscription ─▶ EventDispatcher ─┬─▶ EventProcessor ─▶ ReplyEmitter
//!                 (address, list)  │        ▲
//!                                  └─▶ EventStorage ─▶ QueueProcessor
//! ```
//!
//! In immediate mode every event is processed in its own task as it
//! arrives. In queued mode the listener only stores events; the queue
//! processor drains storage at the configured rate.

pub mod dispatcher;
pub mod processor;
pub mod queue;
pub mod storage;

pub use dispatcher::{Dispatch, EventDispatcher};
pub use processor::EventProcessor;
pub use queue::{QueueHandle, QueueProcessor, QueueStats, TickOutcome};
pub use storage::{AckStatus, EventStorage, InMemoryEventStorage, StorageError, StoredEvent};

use crate::auth::AuthConfig;
use crate::domain::config::{ProcessingMode, ServerConfig};
use crate::domain::error::RpcError;
use crate::lifecycle::{Lifecycle, LifecycleEvent};
use crate::ports::{SystemTimeSource, TimeSource};
use crate::registry::{MethodHandler, MethodRegistry};
use crate::reply::ReplyEmitter;
use crate::whitelist::{WhitelistProvider, WhitelistStore};
use shared_relay::{
    Keys, MessageCrypto, PublicKey, RelayFilter, RelayPool, SubscriptionCloser,
    KIND_ENCRYPTED_DIRECT_MESSAGE,
};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Tasks and handles owned while listening.
struct RunningState {
    closer: SubscriptionCloser,
    listener: JoinHandle<()>,
    queue: Option<QueueHandle>,
}

/// Server half of the protocol.
pub struct RpcServer {
    config: ServerConfig,
    keys: Arc<Keys>,
    pool: Arc<dyn RelayPool>,
    crypto: Arc<dyn MessageCrypto>,
    registry: Arc<MethodRegistry>,
    whitelist: Arc<WhitelistStore>,
    storage: Arc<dyn EventStorage>,
    custom_storage: bool,
    time: Arc<dyn TimeSource>,
    lifecycle: Lifecycle,
    running: Mutex<Option<RunningState>>,
}

impl RpcServer {
    /// Create a server identified by `keys`.
    ///
    /// The global whitelist is seeded from `config.allowed_authors`.
    pub fn new(
        config: ServerConfig,
        keys: Keys,
        pool: Arc<dyn RelayPool>,
        crypto: Arc<dyn MessageCrypto>,
    ) -> Result<Self, RpcError> {
        config.validate()?;
        let whitelist = WhitelistStore::with_authors(config.allowed_author_keys()?);
        let time: Arc<dyn TimeSource> = Arc::new(SystemTimeSource);

        Ok(Self {
            storage: Arc::new(InMemoryEventStorage::new(Arc::clone(&time))),
            custom_storage: false,
            config,
            keys: Arc::new(keys),
            pool,
            crypto,
            registry: Arc::new(MethodRegistry::new()),
            whitelist: Arc::new(whitelist),
            time,
            lifecycle: Lifecycle::new(),
            running: Mutex::new(None),
        })
    }

    /// Use a custom storage backend for queued mode.
    #[must_use]
    pub fn with_storage(mut self, storage: Arc<dyn EventStorage>) -> Self {
        self.storage = storage;
        self.custom_storage = true;
        self
    }

    #[must_use]
    pub fn with_time_source(mut self, time: Arc<dyn TimeSource>) -> Self {
        if !self.custom_storage {
            self.storage = Arc::new(InMemoryEventStorage::new(Arc::clone(&time)));
        }
        self.time = time;
        self
    }

    /// Resolve the global whitelist through `provider` instead of the
    /// internal set.
    #[must_use]
    pub fn with_whitelist_provider(self, provider: Arc<dyn WhitelistProvider>) -> Self {
        self.whitelist.set_provider(Some(provider));
        self
    }

    #[must_use]
    pub fn public_key(&self) -> &PublicKey {
        self.keys.public_key()
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Observe `Started`, `Stopped` and `Error` signals.
    #[must_use]
    pub fn lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.lifecycle.subscribe()
    }

    /// Register a method. Returns true if it replaced an existing one.
    pub fn register_method(
        &self,
        name: impl Into<String>,
        handler: impl MethodHandler + 'static,
        auth: AuthConfig,
    ) -> bool {
        self.registry.register(name, handler, auth)
    }

    #[must_use]
    pub fn registry(&self) -> &MethodRegistry {
        &self.registry
    }

    // ------------------------------------------------------------------
    // Global whitelist
    // ------------------------------------------------------------------

    pub fn add_to_whitelist(&self, authors: impl IntoIterator<Item = PublicKey>) {
        self.whitelist.add(authors);
    }

    pub fn remove_from_whitelist(&self, authors: &[PublicKey]) {
        self.whitelist.remove(authors);
    }

    pub fn clear_whitelist(&self) {
        self.whitelist.clear();
    }

    /// Install or remove a provider. While installed it overrides the
    /// internal set.
    pub fn set_whitelist_provider(&self, provider: Option<Arc<dyn WhitelistProvider>>) {
        self.whitelist.set_provider(provider);
    }

    /// The effective whitelist; `None` means unrestricted.
    pub async fn author_whitelist(&self) -> Option<Vec<PublicKey>> {
        self.whitelist.resolve().await
    }

    /// Whether `author` passes the global whitelist.
    pub async fn is_in_whitelist(&self, author: &PublicKey) -> bool {
        self.whitelist.is_allowed(author).await
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Events waiting in storage.
    pub async fn pending_events(&self) -> Result<usize, RpcError> {
        Ok(self.storage.size().await?)
    }

    /// Subscribe to requests addressed to this server and start processing.
    ///
    /// Only events created from now on are requested. Calling `start` while
    /// already running does nothing.
    pub async fn start(&self) -> Result<(), RpcError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            info!("Server already listening");
            return Ok(());
        }

        let emitter = ReplyEmitter::new(
            Arc::clone(&self.pool),
            Arc::clone(&self.crypto),
            Arc::clone(&self.keys),
            self.config.relays.clone(),
            Arc::clone(&self.time),
        );
        let processor = Arc::new(EventProcessor::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.whitelist),
            Arc::clone(&self.crypto),
            Arc::clone(&self.keys),
            emitter,
            self.lifecycle.clone(),
        ));
        let dispatcher = Arc::new(EventDispatcher::new(
            self.keys.public_key().clone(),
            Arc::clone(&self.whitelist),
            self.config.processing_mode,
            Arc::clone(&self.storage),
            Arc::clone(&processor),
        ));

        let filter = RelayFilter::all()
            .kind(KIND_ENCRYPTED_DIRECT_MESSAGE)
            .recipient(self.keys.public_key().clone())
            .since(self.time.now());
        let mut subscription = self.pool.subscribe(&self.config.relays, filter).await?;
        let closer = subscription.closer();

        let queue = match self.config.processing_mode {
            ProcessingMode::Immediate => None,
            ProcessingMode::Queued => Some(
                Arc::new(QueueProcessor::new(
                    Arc::clone(&self.storage),
                    processor,
                    self.config.queue.clone(),
                ))
                .spawn(),
            ),
        };

        let lifecycle = self.lifecycle.clone();
        let listener = tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                match dispatcher.mode() {
                    ProcessingMode::Immediate => {
                        let dispatcher = Arc::clone(&dispatcher);
                        tokio::spawn(async move {
                            dispatcher.on_event(event).await;
                        });
                    }
                    ProcessingMode::Queued => {
                        dispatcher.on_event(event).await;
                    }
                }
            }
            if !subscription.is_closed() {
                warn!("Request subscription ended unexpectedly");
                lifecycle.emit(LifecycleEvent::Error(
                    "Request subscription ended unexpectedly".into(),
                ));
            }
            debug!("Request listener exited");
        });

        *running = Some(RunningState {
            closer,
            listener,
            queue,
        });
        drop(running);

        info!(
            public_key = %self.keys.public_key().short(),
            relays = self.config.relays.len(),
            mode = ?self.config.processing_mode,
            methods = self.registry.len(),
            "RPC server started"
        );
        self.lifecycle.emit(LifecycleEvent::Started);
        Ok(())
    }

    /// Stop listening, stop the queue and close this server's relay
    /// subscriptions.
    ///
    /// In queued mode the batch in progress is finished and acknowledged
    /// first. Calling `stop` while stopped does nothing.
    pub async fn stop(&self) {
        let Some(state) = self.running.lock().await.take() else {
            debug!("Server not running");
            return;
        };

        state.closer.close();
        state.listener.abort();
        // Aborted listener drops its subscription once it has been awaited
        let _ = state.listener.await;
        if let Some(queue) = state.queue {
            queue.shutdown().await;
        }
        self.pool.close(&self.config.relays).await;

        info!("RPC server stopped");
        self.lifecycle.emit(LifecycleEvent::Stopped);
    }
}

impl std::fmt::Debug for RpcServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcServer")
            .field("public_key", self.keys.public_key())
            .field("config", &self.config)
            .field("methods", &self.registry.len())
            .finish_non_exhaustive()
    }
}
