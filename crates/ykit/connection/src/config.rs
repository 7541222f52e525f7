//! Connection configuration

use std::thread::ThreadId;
use std::time::Duration;

use ykit_apdu_core::processor::DEFAULT_MAX_CHAINS;

/// Default watchdog for a single queue entry
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Default wait for `start_synchronous` / `stop_synchronous`
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration shared by every connection owned by a context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Watchdog applied to entries submitted without an explicit timeout
    pub command_timeout: Duration,
    /// How long the synchronous lifecycle calls wait for their target state
    pub sync_timeout: Duration,
    /// Cap on `61XX` continuations for one command
    pub max_chains: usize,
    /// Thread that must never block on a synchronous lifecycle call
    pub ui_thread: Option<ThreadId>,
    /// Retry policy for connecting to a discovered NFC tag
    pub nfc_retry: NfcRetryPolicy,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            sync_timeout: DEFAULT_SYNC_TIMEOUT,
            max_chains: DEFAULT_MAX_CHAINS,
            ui_thread: None,
            nfc_retry: NfcRetryPolicy::default(),
        }
    }
}

impl ConnectionConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default command timeout
    pub const fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set the synchronous lifecycle timeout
    pub const fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self
    }

    /// Set the continuation cap
    pub const fn with_max_chains(mut self, max_chains: usize) -> Self {
        self.max_chains = max_chains;
        self
    }

    /// Register the UI thread
    pub const fn with_ui_thread(mut self, thread: ThreadId) -> Self {
        self.ui_thread = Some(thread);
        self
    }

    /// Set the NFC connect retry policy
    pub const fn with_nfc_retry(mut self, policy: NfcRetryPolicy) -> Self {
        self.nfc_retry = policy;
        self
    }
}

/// Bounded exponential backoff for connecting to an NFC tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NfcRetryPolicy {
    /// Total connect attempts, including the first
    pub attempts: u32,
    /// Delay before the second attempt
    pub initial_backoff: Duration,
    /// Factor applied to the delay after each failed attempt
    pub multiplier: u32,
    /// Upper bound for a single delay
    pub max_backoff: Duration,
}

impl Default for NfcRetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff: Duration::from_millis(50),
            multiplier: 2,
            max_backoff: Duration::from_millis(500),
        }
    }
}

impl NfcRetryPolicy {
    /// Policy that tries exactly once
    pub const fn none() -> Self {
        Self {
            attempts: 1,
            initial_backoff: Duration::ZERO,
            multiplier: 1,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}
