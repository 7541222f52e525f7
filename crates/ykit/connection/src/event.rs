//! Events published by connections

use derive_more::Display;
use ykit_apdu_core::Error;

/// Physical link a connection event came from
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionKind {
    /// Wired accessory (USB, Lightning, PC/SC reader)
    #[display("accessory")]
    Accessory,
    /// NFC tag session
    #[display("nfc")]
    Nfc,
}

/// Events published by a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A key is connected and commands can be submitted
    Connected {
        /// Link the key is on
        kind: ConnectionKind,
    },
    /// The connection closed; `error` is set when the key went away on its own
    Disconnected {
        /// Link the key was on
        kind: ConnectionKind,
        /// Cause of an unrequested disconnect
        error: Option<Error>,
    },
    /// The connection could not be established or was invalidated by the platform
    Failed {
        /// Link that failed
        kind: ConnectionKind,
        /// Failure reason
        error: Error,
    },
}

impl ConnectionEvent {
    /// Link the event came from
    pub const fn kind(&self) -> ConnectionKind {
        match self {
            Self::Connected { kind }
            | Self::Disconnected { kind, .. }
            | Self::Failed { kind, .. } => *kind,
        }
    }
}
