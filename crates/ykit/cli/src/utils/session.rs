use std::sync::Arc;

use anyhow::{Context as _, bail};
use tracing::info;
use ykit_connection::{AccessoryConnection, ConnectionConfig, KeyContext};
use ykit_transport_pcsc::{PcscConfig, PcscDriver};

/// Open wired connection to the first key found in a reader
#[derive(Debug)]
pub(crate) struct KeyConnection {
    context: KeyContext,
}

impl KeyConnection {
    /// Wait for a key in a reader matching `filter` and open a session with it
    pub(crate) fn open(filter: Option<&str>) -> anyhow::Result<Self> {
        let mut config = PcscConfig::new();
        if let Some(filter) = filter {
            config = config.with_reader_filter(filter);
        }
        let driver = PcscDriver::new(config).context("PC/SC is not available")?;
        let context =
            KeyContext::new(ConnectionConfig::new()).with_accessory_driver(Arc::new(driver))?;

        let Some(accessory) = context.accessory() else {
            bail!("no accessory connection registered");
        };
        if !accessory.start_synchronous() {
            bail!("no security key found; insert one and try again");
        }
        if let Some(description) = accessory.accessory() {
            info!(reader = %description.name, "Using key");
        }
        Ok(Self { context })
    }

    /// Context to open application sessions on
    pub(crate) const fn context(&self) -> &KeyContext {
        &self.context
    }

    fn accessory(&self) -> Option<&AccessoryConnection> {
        self.context.accessory()
    }
}

impl Drop for KeyConnection {
    fn drop(&mut self) {
        if let Some(accessory) = self.accessory() {
            accessory.stop_synchronous();
        }
    }
}
