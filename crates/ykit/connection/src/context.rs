//! Caller-owned registry of connections

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::debug;
use ykit_apdu_core::Error;

use crate::accessory::{AccessoryConnection, AccessoryDriver};
use crate::config::ConnectionConfig;
use crate::event::ConnectionEvent;
use crate::nfc::{NfcConnection, NfcReader};
use crate::smart_card::SmartCardInterface;

/// Owner of the connections an application uses
///
/// Create one per application and pass it to whatever needs a key. Events
/// from every connection are merged into [`KeyContext::events`].
#[derive(Debug)]
pub struct KeyContext {
    config: ConnectionConfig,
    accessory: Option<AccessoryConnection>,
    nfc: Option<NfcConnection>,
    events_tx: Sender<ConnectionEvent>,
    events_rx: Receiver<ConnectionEvent>,
}

impl KeyContext {
    /// Context without any connections
    pub fn new(config: ConnectionConfig) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            config,
            accessory: None,
            nfc: None,
            events_tx,
            events_rx,
        }
    }

    /// Add a wired connection driven by `driver`
    pub fn with_accessory_driver(
        mut self,
        driver: Arc<dyn AccessoryDriver>,
    ) -> Result<Self, Error> {
        let connection = AccessoryConnection::new(driver, self.config.clone())?;
        connection.forward_events(self.events_tx.clone());
        debug!("Accessory connection registered");
        self.accessory = Some(connection);
        Ok(self)
    }

    /// Add an NFC connection using `reader`
    pub fn with_nfc_reader(mut self, reader: Arc<dyn NfcReader>) -> Result<Self, Error> {
        let connection = NfcConnection::new(reader, self.config.clone())?;
        connection.forward_events(self.events_tx.clone());
        debug!("NFC connection registered");
        self.nfc = Some(connection);
        Ok(self)
    }

    /// Configuration shared by the connections
    pub const fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Wired connection, if a driver was registered
    pub const fn accessory(&self) -> Option<&AccessoryConnection> {
        self.accessory.as_ref()
    }

    /// NFC connection, if a reader was registered
    pub const fn nfc(&self) -> Option<&NfcConnection> {
        self.nfc.as_ref()
    }

    /// Whether NFC is available
    pub const fn supports_nfc(&self) -> bool {
        self.nfc.is_some()
    }

    /// Events from every connection, merged
    ///
    /// Receivers share one stream; each event goes to exactly one of them.
    pub fn events(&self) -> Receiver<ConnectionEvent> {
        self.events_rx.clone()
    }

    /// Engine of whichever connection is open, preferring the wired one
    pub fn smart_card(&self) -> Result<SmartCardInterface, Error> {
        self.accessory
            .as_ref()
            .and_then(|c| c.smart_card().ok())
            .or_else(|| self.nfc.as_ref().and_then(|c| c.smart_card().ok()))
            .ok_or(Error::NotConnected)
    }
}
