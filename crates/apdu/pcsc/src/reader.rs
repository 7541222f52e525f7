//! Reader representation for PC/SC devices

use pcsc::{ReaderState, State};

/// Snapshot of a PC/SC card reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcscReader {
    name: String,
    atr: Option<Vec<u8>>,
}

impl PcscReader {
    /// Reader named `name`, holding a card with `atr` if any
    pub fn new(name: impl Into<String>, atr: Option<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            atr,
        }
    }

    /// Get the reader name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if a card is present in the reader
    pub const fn has_card(&self) -> bool {
        self.atr.is_some()
    }

    /// Get the ATR of the card if present
    pub fn atr(&self) -> Option<&[u8]> {
        self.atr.as_deref()
    }

    pub(crate) fn from_reader_state(reader_state: &ReaderState) -> Self {
        let state = reader_state.event_state();
        let present = state.contains(State::PRESENT) && !state.contains(State::EMPTY);
        // a mute card never answered the reset
        let usable = present && !state.contains(State::MUTE);
        Self {
            name: reader_state.name().to_string_lossy().into_owned(),
            atr: usable.then(|| reader_state.atr().to_vec()),
        }
    }
}
