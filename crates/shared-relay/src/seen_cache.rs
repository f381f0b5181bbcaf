//! # Seen-Event Cache
//!
//! The same event reaches a subscriber once per relay that carries it. This
//! cache lets a subscription surface each event id only once.
//!
//! - Ids are remembered for a validity window measured from the event's
//!   `created_at`
//! - Expired ids are garbage-collected periodically, bounding memory

use crate::unix_now;
use std::collections::HashMap;

/// Time-bounded set of already delivered event ids.
#[derive(Debug)]
pub struct SeenEventCache {
    /// Map of event id -> event creation time.
    cache: HashMap<String, u64>,

    /// How long an id is remembered, in seconds.
    validity_window_secs: u64,

    /// Last garbage collection timestamp.
    last_gc: u64,

    /// Garbage collection interval in seconds.
    gc_interval_secs: u64,
}

impl SeenEventCache {
    /// Default validity window.
    pub const DEFAULT_VALIDITY_WINDOW: u64 = 600;

    /// Default garbage collection interval.
    pub const DEFAULT_GC_INTERVAL: u64 = 30;

    /// Create a cache with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(Self::DEFAULT_VALIDITY_WINDOW, Self::DEFAULT_GC_INTERVAL)
    }

    /// Create a cache with custom settings.
    #[must_use]
    pub fn with_config(validity_window_secs: u64, gc_interval_secs: u64) -> Self {
        Self {
            cache: HashMap::new(),
            validity_window_secs,
            last_gc: unix_now(),
            gc_interval_secs,
        }
    }

    /// Record an id. Returns false if it was already seen.
    pub fn insert(&mut self, id: &str, created_at: u64) -> bool {
        let now = unix_now();
        if now.saturating_sub(self.last_gc) > self.gc_interval_secs {
            self.garbage_collect(now);
            self.last_gc = now;
        }

        if self.cache.contains_key(id) {
            return false;
        }
        self.cache.insert(id.to_string(), created_at);
        true
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.cache.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    fn garbage_collect(&mut self, now: u64) {
        let expiry_threshold = now.saturating_sub(self.validity_window_secs);
        self.cache.retain(|_, &mut ts| ts > expiry_threshold);
    }
}

impl Default for SeenEventCache {
    fn default() -> Self {
        Self::new()
    }
}
