//! Client and server configuration with validation.
//!
//! Keys are never part of configuration; they are passed to constructors.

use serde::{Deserialize, Serialize};
use shared_relay::{PublicKey, Tag, DEFAULT_RELAY};
use std::time::Duration;

/// Upper bound on queued events processed per tick.
///
/// Every failed item publishes an error reply, so the batch size is held
/// under typical relay publish-rate limits.
pub const MAX_PROCESSING_RATE: u32 = 3;

fn default_relays() -> Vec<String> {
    vec![DEFAULT_RELAY.to_string()]
}

/// How the server handles an inbound request once it passed the filters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingMode {
    /// Process inline as events arrive.
    #[default]
    Immediate,
    /// Store, then process in rate-limited batches.
    Queued,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Relay endpoints to listen and reply on
    pub relays: Vec<String>,
    pub processing_mode: ProcessingMode,
    /// Queue settings, used in queued mode
    pub queue: QueueConfig,
    /// Seed for the global author whitelist (hex or npub)
    pub allowed_authors: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            relays: default_relays(),
            processing_mode: ProcessingMode::default(),
            queue: QueueConfig::default(),
            allowed_authors: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_relays(&self.relays)?;
        self.queue.validate()?;
        for author in &self.allowed_authors {
            PublicKey::parse(author)
                .map_err(|_| ConfigError::InvalidAuthor(author.clone()))?;
        }
        Ok(())
    }

    /// Normalized whitelist seed.
    pub fn allowed_author_keys(&self) -> Result<Vec<PublicKey>, ConfigError> {
        self.allowed_authors
            .iter()
            .map(|author| {
                PublicKey::parse(author).map_err(|_| ConfigError::InvalidAuthor(author.clone()))
            })
            .collect()
    }
}

/// Queue processor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Events per tick. 0 means the maximum; larger values are capped.
    pub processing_rate: u32,
    /// Budget for processing one queued event
    #[serde(with = "humantime_serde")]
    pub event_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            processing_rate: MAX_PROCESSING_RATE,
            event_timeout: Duration::from_secs(30),
        }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.event_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "event_timeout cannot be 0".into(),
            ));
        }
        Ok(())
    }

    /// Processing rate after defaulting and capping, in `1..=3`.
    #[must_use]
    pub fn effective_rate(&self) -> u32 {
        match self.processing_rate {
            0 => MAX_PROCESSING_RATE,
            rate => rate.min(MAX_PROCESSING_RATE),
        }
    }

    /// Events dequeued per tick.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.effective_rate().max(1) as usize
    }

    /// Interval between ticks.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.effective_rate()))
    }
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Relay endpoints to publish and subscribe on
    pub relays: Vec<String>,
    /// Counterpart for `call`
    pub server_public_key: Option<PublicKey>,
    /// Deadline for `call` and waiting `send_message`
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// How far before the request's timestamp reply subscriptions start
    #[serde(with = "humantime_serde")]
    pub reply_since_skew: Duration,
    /// Reject message replies that carry no `e` back-reference
    pub strict_reply_reference: bool,
    /// Extra tags appended to every outbound event
    pub tags: Vec<Tag>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relays: default_relays(),
            server_public_key: None,
            timeout: Duration::from_secs(30),
            reply_since_skew: Duration::from_secs(5),
            strict_reply_reference: false,
            tags: Vec::new(),
        }
    }
}

impl ClientConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_relays(&self.relays)?;
        if self.timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout("timeout cannot be 0".into()));
        }
        if let Some(tag) = self.tags.iter().find(|tag| tag.is_empty()) {
            return Err(ConfigError::Invalid(format!("empty tag: {tag:?}")));
        }
        Ok(())
    }
}

fn validate_relays(relays: &[String]) -> Result<(), ConfigError> {
    if relays.is_empty() {
        return Err(ConfigError::NoRelays);
    }
    if let Some(bad) = relays
        .iter()
        .find(|url| !(url.starts_with("ws://") || url.starts_with("wss://")))
    {
        return Err(ConfigError::InvalidRelay(bad.clone()));
    }
    Ok(())
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("no relays configured")]
    NoRelays,
    #[error("invalid relay url: {0}")]
    InvalidRelay(String),
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    #[error("invalid allowed author: {0}")]
    InvalidAuthor(String),
    /// `call` needs a counterpart
    #[error("server public key not configured")]
    MissingServerKey,
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Humantime serde module for Duration serialization
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(super) fn parse_duration(s: &str) -> Result<Duration, &'static str> {
        let s = s.trim();
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| "invalid milliseconds")
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid seconds")
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim()
                .parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(|_| "invalid minutes")
        } else {
            // Plain number of seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid duration format")
        }
    }
}
