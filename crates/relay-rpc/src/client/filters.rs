//! Subscription filter overrides.
//!
//! Each client subscription starts from a base filter. A builder, when
//! installed, receives a copy of that filter plus a description of the
//! subscription and returns the filter actually sent to the relays.

use serde_json::Value;
use shared_relay::{PublicKey, RelayFilter};
use std::sync::Arc;

/// What a subscription is for.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterContext {
    /// Reply to `call`.
    Call {
        method: String,
        params: Value,
        request_id: String,
    },
    /// Reply to a `send_message` that waits.
    MessageReply {
        recipient: PublicKey,
        sent_event_id: String,
        sent_timestamp: u64,
    },
    /// `listen_for_messages`.
    Incoming { sender: PublicKey },
}

/// Filter builder: `(base filter, context) -> filter to use`.
pub type FilterBuilder = Arc<dyn Fn(RelayFilter, &FilterContext) -> RelayFilter + Send + Sync>;

/// Installed builders. The message-reply builder falls back to the reply
/// builder when unset.
#[derive(Clone, Default)]
pub struct FilterOverrides {
    pub reply: Option<FilterBuilder>,
    pub message_reply: Option<FilterBuilder>,
    pub incoming: Option<FilterBuilder>,
}

impl FilterOverrides {
    /// Apply the builder matching `context`, if any.
    #[must_use]
    pub fn build(&self, base: RelayFilter, context: &FilterContext) -> RelayFilter {
        let builder = match context {
            FilterContext::Call { .. } => self.reply.as_ref(),
            FilterContext::MessageReply { .. } => {
                self.message_reply.as_ref().or(self.reply.as_ref())
            }
            FilterContext::Incoming { .. } => self.incoming.as_ref(),
        };
        match builder {
            Some(build) => build(base, context),
            None => base,
        }
    }
}

impl std::fmt::Debug for FilterOverrides {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterOverrides")
            .field("reply", &self.reply.is_some())
            .field("message_reply", &self.message_reply.is_some())
            .field("incoming", &self.incoming.is_some())
            .finish()
    }
}
