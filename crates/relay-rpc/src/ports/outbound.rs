//! Outbound ports.

/// Time source trait for testability
pub trait TimeSource: Send + Sync {
    /// Unix seconds.
    fn now(&self) -> u64;

    /// Unix milliseconds.
    fn now_millis(&self) -> u64 {
        self.now().saturating_mul(1000)
    }
}

/// System time implementation
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl SystemTimeSource {
    fn since_epoch() -> std::time::Duration {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            // Clock before Unix epoch - report 0 rather than panic
            .unwrap_or_default()
    }
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> u64 {
        Self::since_epoch().as_secs()
    }

    fn now_millis(&self) -> u64 {
        Self::since_epoch().as_millis() as u64
    }
}

/// Fixed clock for tests.
#[derive(Debug, Default)]
pub struct ManualTimeSource {
    now: std::sync::atomic::AtomicU64,
}

impl ManualTimeSource {
    #[must_use]
    pub fn new(now: u64) -> Self {
        Self {
            now: std::sync::atomic::AtomicU64::new(now),
        }
    }

    pub fn set(&self, now: u64) {
        self.now.store(now, std::sync::atomic::Ordering::Relaxed);
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> u64 {
        self.now.load(std::sync::atomic::Ordering::Relaxed)
    }
}
