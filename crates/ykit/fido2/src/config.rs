//! FIDO2 session configuration

use std::time::Duration;

/// Interval between keep-alive polls while the key waits for a touch
pub const DEFAULT_TOUCH_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Watchdog for operations that may wait for a touch
pub const DEFAULT_TOUCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for a [`crate::Fido2Session`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fido2Config {
    /// Interval between `80 11 00 00` polls while the key waits for a touch
    pub touch_poll_interval: Duration,
    /// Deadline for operations that can require a touch
    pub touch_timeout: Duration,
}

impl Default for Fido2Config {
    fn default() -> Self {
        Self {
            touch_poll_interval: DEFAULT_TOUCH_POLL_INTERVAL,
            touch_timeout: DEFAULT_TOUCH_TIMEOUT,
        }
    }
}

impl Fido2Config {
    /// Default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the keep-alive poll interval
    pub const fn with_touch_poll_interval(mut self, interval: Duration) -> Self {
        self.touch_poll_interval = interval;
        self
    }

    /// Set the deadline for touch operations
    pub const fn with_touch_timeout(mut self, timeout: Duration) -> Self {
        self.touch_timeout = timeout;
        self
    }
}
