//! # Subscription Filters
//!
//! Relay-side filter: every populated field must match.

use crate::event::RelayEvent;
use crate::keys::PublicKey;
use crate::RECIPIENT_TAG;
use serde::{Deserialize, Serialize};

/// Filter for selecting events from relays.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayFilter {
    /// Event kinds to match (empty/None = all).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u16>>,

    /// Authors to match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<PublicKey>>,

    /// Recipients named by any `p` tag.
    #[serde(rename = "#p", default, skip_serializing_if = "Option::is_none")]
    pub recipients: Option<Vec<PublicKey>>,

    /// Lower bound on `created_at`, inclusive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
}

impl RelayFilter {
    /// Filter matching everything.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn kind(mut self, kind: u16) -> Self {
        self.kinds.get_or_insert_with(Vec::new).push(kind);
        self
    }

    #[must_use]
    pub fn author(mut self, author: PublicKey) -> Self {
        self.authors.get_or_insert_with(Vec::new).push(author);
        self
    }

    #[must_use]
    pub fn authors(mut self, authors: impl IntoIterator<Item = PublicKey>) -> Self {
        self.authors.get_or_insert_with(Vec::new).extend(authors);
        self
    }

    #[must_use]
    pub fn recipient(mut self, recipient: PublicKey) -> Self {
        self.recipients.get_or_insert_with(Vec::new).push(recipient);
        self
    }

    #[must_use]
    pub fn since(mut self, since: u64) -> Self {
        self.since = Some(since);
        self
    }

    /// Check if an event matches this filter.
    #[must_use]
    pub fn matches(&self, event: &RelayEvent) -> bool {
        if let Some(kinds) = &self.kinds {
            if !kinds.is_empty() && !kinds.contains(&event.kind) {
                return false;
            }
        }

        if let Some(authors) = &self.authors {
            if !authors.is_empty() && !authors.contains(&event.pubkey) {
                return false;
            }
        }

        if let Some(recipients) = &self.recipients {
            if !recipients.is_empty() {
                let tagged = event
                    .tags
                    .iter()
                    .filter(|tag| tag.first().map(String::as_str) == Some(RECIPIENT_TAG))
                    .filter_map(|tag| tag.get(1))
                    .any(|value| recipients.iter().any(|r| r.as_str() == value));
                if !tagged {
                    return false;
                }
            }
        }

        if let Some(since) = self.since {
            if event.created_at < since {
                return false;
            }
        }

        true
    }
}
