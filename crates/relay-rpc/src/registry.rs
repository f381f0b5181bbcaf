//! Method registry: name → handler + authorization.

use crate::auth::AuthConfig;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use shared_relay::{PublicKey, RelayEvent};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Everything a handler gets to see about one request.
#[derive(Debug, Clone)]
pub struct CallContext {
    /// Request params; `{}` when the request carried none
    pub params: Value,
    /// The raw inbound event
    pub event: RelayEvent,
    pub message_id: String,
    pub sender: PublicKey,
}

/// A callable RPC method.
///
/// The error's display text is sent back as the reply's `error`.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    async fn handle(&self, ctx: CallContext) -> anyhow::Result<Value>;
}

#[async_trait]
impl<F, Fut> MethodHandler for F
where
    F: Fn(CallContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send,
{
    async fn handle(&self, ctx: CallContext) -> anyhow::Result<Value> {
        self(ctx).await
    }
}

/// A registered method.
pub struct MethodRegistration {
    pub name: String,
    pub handler: Arc<dyn MethodHandler>,
    pub auth: AuthConfig,
}

impl std::fmt::Debug for MethodRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodRegistration")
            .field("name", &self.name)
            .field("auth", &self.auth)
            .finish_non_exhaustive()
    }
}

/// Registered methods. Names are unique; registering again replaces.
#[derive(Default)]
pub struct MethodRegistry {
    methods: RwLock<HashMap<String, Arc<MethodRegistration>>>,
}

impl MethodRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a method. Returns true if it replaced an existing one.
    pub fn register(
        &self,
        name: impl Into<String>,
        handler: impl MethodHandler + 'static,
        auth: AuthConfig,
    ) -> bool {
        let name = name.into();
        let registration = Arc::new(MethodRegistration {
            name: name.clone(),
            handler: Arc::new(handler),
            auth,
        });

        let replaced = self
            .methods
            .write()
            .insert(name.clone(), registration)
            .is_some();
        if replaced {
            warn!(method = %name, "Method re-registered, previous handler replaced");
        } else {
            debug!(method = %name, "Method registered");
        }
        replaced
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<MethodRegistration>> {
        self.methods.read().get(name).cloned()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.methods.read().contains_key(name)
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.methods.write().remove(name).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.read().is_empty()
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.methods.read().keys().cloned().collect();
        names.sort();
        names
    }
}
