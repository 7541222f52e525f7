//! Connections to hardware security keys
//!
//! This crate turns a byte-exchange transport into something applications can
//! share safely:
//!
//! - [`SmartCardInterface`]: a FIFO command engine with a single worker, so
//!   concurrent submitters never interleave APDUs on the card
//! - [`AccessoryConnection`] and [`NfcConnection`]: observable lifecycle state
//!   machines driven by platform drivers
//! - [`Session`]: the contract application protocols (OATH, FIDO2) build on
//! - [`KeyContext`]: the caller-owned registry of connections
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

pub mod accessory;
pub mod config;
pub mod context;
pub mod event;
pub mod nfc;
pub mod observe;
pub mod pending;
pub mod session;
pub mod smart_card;

pub use accessory::{
    AccessoryConnection, AccessoryDescription, AccessoryDriver, AccessoryEvents, AccessoryState,
};
pub use config::{ConnectionConfig, NfcRetryPolicy};
pub use context::KeyContext;
pub use event::{ConnectionEvent, ConnectionKind};
pub use nfc::{
    NfcCompletion, NfcConnection, NfcEvents, NfcInvalidation, NfcReader, NfcState, NfcTag,
};
pub use pending::{CancellationToken, Pending};
pub use session::{Session, SessionBinding, SessionToken};
pub use smart_card::{CardChannel, CommandOptions, SmartCardInterface};

/// Something that can hand out the engine of an open connection
pub trait Connection {
    /// Engine for the open session, or [`ykit_apdu_core::Error::NotConnected`]
    fn smart_card(&self) -> Result<SmartCardInterface, ykit_apdu_core::Error>;
}

impl Connection for AccessoryConnection {
    fn smart_card(&self) -> Result<SmartCardInterface, ykit_apdu_core::Error> {
        Self::smart_card(self)
    }
}

impl Connection for NfcConnection {
    fn smart_card(&self) -> Result<SmartCardInterface, ykit_apdu_core::Error> {
        Self::smart_card(self)
    }
}

impl Connection for KeyContext {
    fn smart_card(&self) -> Result<SmartCardInterface, ykit_apdu_core::Error> {
        Self::smart_card(self)
    }
}

impl Connection for SmartCardInterface {
    fn smart_card(&self) -> Result<SmartCardInterface, ykit_apdu_core::Error> {
        if self.is_open() {
            Ok(self.clone())
        } else {
            Err(ykit_apdu_core::Error::ConnectionClosed)
        }
    }
}
