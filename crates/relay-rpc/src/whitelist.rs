//! Global author whitelist.
//!
//! Two sources: an internal set maintained through `add` / `remove` /
//! `clear`, and an optional provider. When a provider is installed it is the
//! only source consulted; the internal set is kept but ignored.
//!
//! An empty or absent list means "no restriction".

use async_trait::async_trait;
use parking_lot::RwLock;
use shared_relay::PublicKey;
use std::sync::Arc;
use tracing::debug;

/// External source of the author whitelist.
#[async_trait]
pub trait WhitelistProvider: Send + Sync {
    /// Current whitelist. `None` or empty means unrestricted.
    async fn author_whitelist(&self) -> Option<Vec<PublicKey>>;
}

#[async_trait]
impl<F> WhitelistProvider for F
where
    F: Fn() -> Option<Vec<PublicKey>> + Send + Sync,
{
    async fn author_whitelist(&self) -> Option<Vec<PublicKey>> {
        self()
    }
}

/// Whitelist state shared by the dispatcher and the queue processor.
#[derive(Default)]
pub struct WhitelistStore {
    authors: RwLock<Vec<PublicKey>>,
    provider: RwLock<Option<Arc<dyn WhitelistProvider>>>,
}

impl WhitelistStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with an initial author list.
    #[must_use]
    pub fn with_authors(authors: impl IntoIterator<Item = PublicKey>) -> Self {
        let store = Self::new();
        store.add(authors);
        store
    }

    /// Add authors, skipping ones already present.
    pub fn add(&self, authors: impl IntoIterator<Item = PublicKey>) {
        let mut list = self.authors.write();
        for author in authors {
            if !list.contains(&author) {
                debug!(author = %author.short(), "Author added to whitelist");
                list.push(author);
            }
        }
    }

    pub fn remove(&self, authors: &[PublicKey]) {
        self.authors.write().retain(|author| !authors.contains(author));
    }

    pub fn clear(&self) {
        self.authors.write().clear();
    }

    /// Install or remove the provider.
    pub fn set_provider(&self, provider: Option<Arc<dyn WhitelistProvider>>) {
        *self.provider.write() = provider;
    }

    #[must_use]
    pub fn has_provider(&self) -> bool {
        self.provider.read().is_some()
    }

    /// Effective whitelist. `None` means unrestricted.
    pub async fn resolve(&self) -> Option<Vec<PublicKey>> {
        let provider = self.provider.read().clone();
        let list = match provider {
            Some(provider) => provider.author_whitelist().await,
            None => Some(self.authors.read().clone()),
        };
        list.filter(|authors| !authors.is_empty())
    }

    /// True if `author` may talk to the server at all.
    pub async fn is_allowed(&self, author: &PublicKey) -> bool {
        match self.resolve().await {
            Some(authors) => authors.contains(author),
            None => true,
        }
    }
}

impl std::fmt::Debug for WhitelistStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhitelistStore")
            .field("authors", &self.authors.read().len())
            .field("provider", &self.has_provider())
            .finish()
    }
}
