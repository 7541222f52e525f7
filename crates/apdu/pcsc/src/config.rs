//! Configuration options for PC/SC transport

use std::time::Duration;

use pcsc::{Protocols as PcscProtocols, ShareMode as PcscShareMode};

/// Default interval between reader scans
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Sharing mode for card connections
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ShareMode {
    /// Exclusive access to the card
    Exclusive,
    /// Shared access to the card (default)
    #[default]
    Shared,
    /// Direct connection to the reader
    Direct,
}

impl From<ShareMode> for PcscShareMode {
    fn from(mode: ShareMode) -> Self {
        match mode {
            ShareMode::Exclusive => Self::Exclusive,
            ShareMode::Shared => Self::Shared,
            ShareMode::Direct => Self::Direct,
        }
    }
}

/// ATR prefix a card must match, with an optional bit mask
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtrPattern {
    /// Expected leading ATR bytes
    pub pattern: Vec<u8>,
    /// Bits of `pattern` that are compared; all bits when absent
    pub mask: Option<Vec<u8>>,
}

impl AtrPattern {
    /// Whether `atr` starts with the pattern under the mask
    pub fn matches(&self, atr: &[u8]) -> bool {
        if self.pattern.len() > atr.len() {
            return false;
        }
        match &self.mask {
            Some(mask) if mask.len() < self.pattern.len() => false,
            Some(mask) => self
                .pattern
                .iter()
                .zip(atr)
                .zip(mask)
                .all(|((p, a), m)| p & m == a & m),
            None => atr.starts_with(&self.pattern),
        }
    }
}

/// Configuration options for PC/SC transport
#[derive(Debug, Clone)]
pub struct PcscConfig {
    /// Sharing mode for card connections
    pub share_mode: ShareMode,

    /// Preferred protocols for card communication
    pub protocols: PcscProtocols,

    /// Case-insensitive substring a reader name must contain
    pub reader_filter: Option<String>,

    /// ATR the card in the reader must match
    pub atr_filter: Option<AtrPattern>,

    /// How long the monitor waits for a reader change before rescanning
    pub poll_interval: Duration,
}

impl Default for PcscConfig {
    fn default() -> Self {
        Self {
            share_mode: ShareMode::Shared,
            protocols: PcscProtocols::ANY,
            reader_filter: None,
            atr_filter: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl PcscConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sharing mode
    pub const fn with_share_mode(mut self, mode: ShareMode) -> Self {
        self.share_mode = mode;
        self
    }

    /// Set the preferred protocols
    pub const fn with_protocols(mut self, protocols: PcscProtocols) -> Self {
        self.protocols = protocols;
        self
    }

    /// Only use readers whose name contains `filter`
    pub fn with_reader_filter(mut self, filter: impl Into<String>) -> Self {
        self.reader_filter = Some(filter.into());
        self
    }

    /// Only use cards whose ATR matches `pattern`
    pub fn with_atr_filter(mut self, pattern: AtrPattern) -> Self {
        self.atr_filter = Some(pattern);
        self
    }

    /// Set the monitor's scan interval
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Whether a reader named `name` passes the reader filter
    pub fn accepts_reader(&self, name: &str) -> bool {
        self.reader_filter
            .as_ref()
            .is_none_or(|filter| name.to_lowercase().contains(&filter.to_lowercase()))
    }

    /// Whether a card with `atr` passes the ATR filter
    pub fn accepts_atr(&self, atr: &[u8]) -> bool {
        self.atr_filter.as_ref().is_none_or(|pattern| pattern.matches(atr))
    }
}
