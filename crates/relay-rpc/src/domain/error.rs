//! RPC error taxonomy.
//!
//! Outbound call errors are returned to the caller. Inbound processing
//! errors never leave the dispatcher: they become error replies or failed
//! acknowledgements, and their `Display` text is what the counterpart or
//! the storage backend sees.

use crate::domain::config::ConfigError;
use crate::server::storage::StorageError;
use shared_relay::{CryptoError, KeyError, RelayError, SubscriptionError};
use thiserror::Error;

/// Reply `error` text for unparseable request payloads.
pub const INVALID_JSON: &str = "Invalid JSON format";

/// Reply `error` text for requests without a method.
pub const MISSING_METHOD: &str = "Missing method field";

/// Errors produced by the RPC client and server.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// No matching reply to a call before its deadline.
    #[error("Request timeout after {timeout_ms}ms")]
    RequestTimeout { timeout_ms: u64 },

    /// No reply to a plain message before its deadline.
    #[error("Reply timeout after {timeout_ms}ms")]
    ReplyTimeout { timeout_ms: u64 },

    /// The counterpart answered with a non-null `error`.
    #[error("{0}")]
    RemoteError(String),

    /// No endpoint accepted the outbound message.
    #[error("Publish failed: {0}")]
    TransportPublishFailure(#[from] RelayError),

    /// A listening subscription could not be opened (server start,
    /// message listener). Reply subscriptions report `TransportPublishFailure`.
    #[error("Subscribe failed: {0}")]
    Subscription(#[from] SubscriptionError),

    #[error("Decryption failed: {0}")]
    DecryptionFailure(String),

    /// Bad JSON or missing method. Carries the reply text.
    #[error("{0}")]
    MalformedRequest(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Permission denied for method: {0}")]
    PermissionDenied(String),

    /// Sender was removed from the whitelist while its event sat in the queue.
    #[error("sender_not_allowed")]
    SenderNotAllowed,

    /// A handler returned an error. Carries its message verbatim.
    #[error("{0}")]
    HandlerFailed(String),

    #[error("Event processing timeout")]
    EventProcessingTimeout,

    #[error(transparent)]
    Crypto(CryptoError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    InvalidKey(#[from] KeyError),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The pending call was released without an outcome.
    #[error("Call cancelled")]
    Cancelled,
}

impl RpcError {
    /// Timeouts are recoverable by retrying the call.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::RequestTimeout { .. } | Self::ReplyTimeout { .. } | Self::EventProcessingTimeout
        )
    }
}

impl From<CryptoError> for RpcError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::DecryptionFailed(msg) => Self::DecryptionFailure(msg),
            CryptoError::Key(key) => Self::InvalidKey(key),
            other => Self::Crypto(other),
        }
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type for RPC operations
pub type RpcResult<T> = Result<T, RpcError>;
