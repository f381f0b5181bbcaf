//! # Relay Events
//!
//! The immutable, signed message unit carried by relays.

use crate::keys::PublicKey;
use crate::{KIND_ENCRYPTED_DIRECT_MESSAGE, RECIPIENT_TAG, REFERENCE_TAG};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A tag is a name followed by its values, e.g. `["p", "<hex pubkey>"]`.
pub type Tag = Vec<String>;

/// A signed event as stored and forwarded by relays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayEvent {
    /// Hex SHA-256 of the canonical serialization.
    pub id: String,
    /// Author identity.
    pub pubkey: PublicKey,
    /// Creation time, unix seconds.
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Tag>,
    /// Encrypted payload.
    pub content: String,
    pub sig: String,
}

impl RelayEvent {
    /// First value of the first tag called `name`.
    #[must_use]
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        find_tag(&self.tags, name)
    }

    /// Recipient named by the `p` tag.
    #[must_use]
    pub fn recipient(&self) -> Option<&str> {
        self.tag_value(RECIPIENT_TAG)
    }

    /// Event this one answers, named by the `e` tag.
    #[must_use]
    pub fn reference(&self) -> Option<&str> {
        self.tag_value(REFERENCE_TAG)
    }

    /// True if the `p` tag names `key`.
    #[must_use]
    pub fn is_addressed_to(&self, key: &PublicKey) -> bool {
        self.recipient() == Some(key.as_str())
    }

    /// First 8 chars of the id, for log lines.
    #[must_use]
    pub fn short_id(&self) -> &str {
        self.id.get(..8).unwrap_or(&self.id)
    }
}

/// An event before its id and signature are computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedEvent {
    pub pubkey: PublicKey,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Tag>,
    pub content: String,
}

impl UnsignedEvent {
    /// Encrypted direct message from `sender` to `recipient`.
    #[must_use]
    pub fn direct_message(
        sender: PublicKey,
        recipient: &PublicKey,
        content: String,
        created_at: u64,
    ) -> Self {
        Self {
            pubkey: sender,
            created_at,
            kind: KIND_ENCRYPTED_DIRECT_MESSAGE,
            tags: vec![vec![RECIPIENT_TAG.to_string(), recipient.to_string()]],
            content,
        }
    }

    /// Append extra tags after the routing tag.
    #[must_use]
    pub fn with_tags(mut self, extra: impl IntoIterator<Item = Tag>) -> Self {
        self.tags.extend(extra);
        self
    }

    /// Mark this event as an answer to `event_id`.
    #[must_use]
    pub fn in_reply_to(mut self, event_id: &str) -> Self {
        self.tags
            .push(vec![REFERENCE_TAG.to_string(), event_id.to_string()]);
        self
    }

    /// Hex SHA-256 of `[0, pubkey, created_at, kind, tags, content]`.
    #[must_use]
    pub fn compute_id(&self) -> String {
        let canonical = serde_json::json!([
            0,
            self.pubkey.as_str(),
            self.created_at,
            self.kind,
            self.tags,
            self.content,
        ]);
        hex::encode(Sha256::digest(canonical.to_string().as_bytes()))
    }

    #[must_use]
    pub fn into_signed(self, id: String, sig: String) -> RelayEvent {
        RelayEvent {
            id,
            pubkey: self.pubkey,
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags,
            content: self.content,
            sig,
        }
    }
}

fn find_tag<'a>(tags: &'a [Tag], name: &str) -> Option<&'a str> {
    tags.iter()
        .find(|tag| tag.first().map(String::as_str) == Some(name))
        .and_then(|tag| tag.get(1))
        .map(String::as_str)
}
