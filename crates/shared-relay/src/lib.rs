//! # Shared Relay - Encrypted Direct-Message Transport Ports
//!
//! The transport boundary used by both the RPC client and the RPC server.
//!
//! ## Model
//!
//! - A message is a signed [`RelayEvent`] addressed to a recipient through a
//!   `p` tag and optionally pointing back at another event through an `e` tag.
//! - A [`RelayPool`] publishes an event to several relay endpoints at once; the
//!   publish succeeds as soon as one endpoint accepts it.
//! - A [`Subscription`] delivers immutable events matching a [`RelayFilter`]
//!   through a single inbound stream, regardless of how many endpoints feed it.
//!
//! ```text
//! ┌──────────────┐  publish(relays)   ┌─────────────┐  recv()   ┌──────────────┐
//! │    Sender    │ ─────────────────▶ │ Relay A..N  │ ────────▶ │ Subscription │
//! └──────────────┘                    └─────────────┘  dedup    └──────────────┘
//! ```
//!
//! ## Collaborators
//!
//! Payload encryption, signing and key derivation are consumed through the
//! [`MessageCrypto`] port. [`DigestCrypto`] is a deterministic implementation
//! for tests and local loopback; it provides no confidentiality.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod crypto;
pub mod event;
pub mod filter;
pub mod keys;
pub mod pool;
pub mod seen_cache;
pub mod subscription;

// Re-export main types
pub use crypto::{DigestCrypto, MessageCrypto};
pub use event::{RelayEvent, Tag, UnsignedEvent};
pub use filter::RelayFilter;
pub use keys::{KeyError, Keys, PublicKey, SecretKey};
pub use pool::{EndpointFailure, InMemoryRelayPool, PublishReceipt, RelayError, RelayPool};
pub use seen_cache::SeenEventCache;
pub use subscription::{Subscription, SubscriptionCloser, SubscriptionError};

pub use crypto::CryptoError;

/// Event kind for encrypted direct messages.
pub const KIND_ENCRYPTED_DIRECT_MESSAGE: u16 = 4;

/// Tag naming the recipient of an event.
pub const RECIPIENT_TAG: &str = "p";

/// Tag naming the event a message answers.
pub const REFERENCE_TAG: &str = "e";

/// Relay used when a configuration names none.
pub const DEFAULT_RELAY: &str = "wss://dev-relay.lnfi.network";

/// Maximum events to buffer per relay before slow subscribers lag.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Current unix time in seconds.
#[must_use]
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
