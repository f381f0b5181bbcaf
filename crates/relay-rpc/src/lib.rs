// Allow missing docs for internal items in development
#![allow(missing_docs)]

//! Relay RPC - correlated request/reply and authorized message processing
//! over encrypted relay messages.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────┐                 ┌──────────────────────────────────┐
//! │        RpcClient         │                 │            RpcServer             │
//! │                          │                 │                                  │
//! │  call / send_message     │   encrypted DM  │  EventDispatcher                 │
//! │   │ PendingCallTable     │ ──────────────▶ │   │ address + whitelist filter   │
//! │   │ (write-once settle)  │                 │   ├─▶ immediate ─┐               │
//! │   ▼                      │                 │   └─▶ storage ─▶ QueueProcessor  │
//! │  reply watcher           │                 │                  │               │
//! │   (match by id / e tag)  │ ◀────────────── │  EventProcessor ◀┘               │
//! │                          │   encrypted DM  │   decrypt → route → auth → reply │
//! └──────────────────────────┘                 └──────────────────────────────────┘
//!              │                                               │
//!              └──────────────── RelayPool (1..N relays) ──────┘
//! ```
//!
//! # Authorization
//!
//! - **public**: anyone
//! - **whitelist**: the method's own list when non-empty, otherwise the
//!   global whitelist; an empty global whitelist allows everyone
//! - **custom**: a predicate over the sender; no predicate denies
//!
//! Unrecognized modes deny.
//!
//! # Usage
//!
//! ```ignore
//! use relay_rpc::{AuthConfig, ClientConfig, RpcClient, RpcServer, ServerConfig};
//!
//! let server = RpcServer::new(ServerConfig::default(), server_keys, pool.clone(), crypto.clone())?;
//! server.register_method("add", add_handler, AuthConfig::public());
//! server.start().await?;
//!
//! let client = RpcClient::new(client_config, client_keys, pool, crypto)?;
//! let sum = client.call("add", json!({"a": 5, "b": 3})).await?;
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod auth;
pub mod client;
pub mod domain;
pub mod lifecycle;
pub mod ports;
pub mod registry;
pub mod reply;
pub mod server;
pub mod whitelist;

// Re-exports for public API
pub use auth::{check_permission, AuthConfig, AuthHandler, AuthMode};
pub use client::{
    FilterBuilder, FilterContext, IncomingMessage, MessageListener, RpcClient, SendOutcome,
};
pub use domain::config::{
    ClientConfig, ConfigError, ProcessingMode, QueueConfig, ServerConfig, MAX_PROCESSING_RATE,
};
pub use domain::correlation::CorrelationId;
pub use domain::envelope::{RpcRequest, RpcResponse};
pub use domain::error::{RpcError, RpcResult};
pub use lifecycle::LifecycleEvent;
pub use ports::{ManualTimeSource, SystemTimeSource, TimeSource};
pub use registry::{CallContext, MethodHandler, MethodRegistry};
pub use reply::ReplyEmitter;
pub use server::{
    AckStatus, EventStorage, InMemoryEventStorage, RpcServer, StorageError, StoredEvent,
};
pub use whitelist::{WhitelistProvider, WhitelistStore};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
