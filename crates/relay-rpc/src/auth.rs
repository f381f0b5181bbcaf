//! Method-level authorization.
//!
//! | Mode        | Decision                                                    |
//! |-------------|-------------------------------------------------------------|
//! | `public`    | always allowed                                              |
//! | `whitelist` | method list if non-empty, else global whitelist (empty = allow) |
//! | `custom`    | registered predicate; no predicate = denied                 |
//! | other       | denied                                                      |

use crate::whitelist::WhitelistStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared_relay::PublicKey;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Authorization mode of a registered method.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    #[default]
    Public,
    Whitelist,
    Custom,
    /// Any tag not listed above. Always denies.
    #[serde(other)]
    Unrecognized,
}

impl FromStr for AuthMode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "public" => Self::Public,
            "whitelist" => Self::Whitelist,
            "custom" => Self::Custom,
            _ => Self::Unrecognized,
        })
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Public => "public",
            Self::Whitelist => "whitelist",
            Self::Custom => "custom",
            Self::Unrecognized => "unrecognized",
        };
        f.write_str(name)
    }
}

/// Predicate for `custom` mode.
#[async_trait]
pub trait AuthHandler: Send + Sync {
    async fn authorize(&self, sender: &PublicKey) -> bool;
}

#[async_trait]
impl<F> AuthHandler for F
where
    F: Fn(&PublicKey) -> bool + Send + Sync,
{
    async fn authorize(&self, sender: &PublicKey) -> bool {
        self(sender)
    }
}

/// Authorization settings attached to a method registration.
#[derive(Clone, Default)]
pub struct AuthConfig {
    pub mode: AuthMode,
    /// Method-specific whitelist, consulted in `whitelist` mode
    pub whitelist: Option<Vec<PublicKey>>,
    /// Predicate, consulted in `custom` mode
    pub handler: Option<Arc<dyn AuthHandler>>,
}

impl AuthConfig {
    /// Anyone may call.
    #[must_use]
    pub fn public() -> Self {
        Self::default()
    }

    /// Only the given authors may call.
    #[must_use]
    pub fn whitelist(authors: impl IntoIterator<Item = PublicKey>) -> Self {
        Self {
            mode: AuthMode::Whitelist,
            whitelist: Some(authors.into_iter().collect()),
            handler: None,
        }
    }

    /// Defer to the server's global whitelist.
    #[must_use]
    pub fn global_whitelist() -> Self {
        Self {
            mode: AuthMode::Whitelist,
            ..Self::default()
        }
    }

    /// Decide through a predicate.
    #[must_use]
    pub fn custom(handler: impl AuthHandler + 'static) -> Self {
        Self {
            mode: AuthMode::Custom,
            whitelist: None,
            handler: Some(Arc::new(handler)),
        }
    }

    /// Config for a mode tag read from configuration.
    #[must_use]
    pub fn from_mode(mode: AuthMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("mode", &self.mode)
            .field("whitelist", &self.whitelist.as_ref().map(Vec::len))
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

/// Decide whether `sender` may invoke a method configured with `config`.
pub async fn check_permission(
    config: &AuthConfig,
    sender: &PublicKey,
    global: &WhitelistStore,
) -> bool {
    let allowed = match config.mode {
        AuthMode::Public => true,
        AuthMode::Whitelist => match config.whitelist.as_deref() {
            Some(list) if !list.is_empty() => list.contains(sender),
            _ => global.is_allowed(sender).await,
        },
        AuthMode::Custom => match &config.handler {
            Some(handler) => handler.authorize(sender).await,
            None => false,
        },
        AuthMode::Unrecognized => false,
    };

    if !allowed {
        debug!(mode = %config.mode, sender = %sender.short(), "Authorization denied");
    }
    allowed
}
