//! PC/SC transport implementation

use std::ffi::CString;
use std::fmt;

use bytes::Bytes;
use pcsc::{Card, Context, Disposition, MAX_BUFFER_SIZE};
use tracing::{debug, warn};
use ykit_apdu_core::transport::{CardTransport, TransportError};

use crate::config::PcscConfig;
use crate::error::PcscError;

/// Byte pipe to the card in one PC/SC reader
pub struct PcscTransport {
    context: Context,
    card: Option<Card>,
    reader_name: String,
    config: PcscConfig,
}

impl fmt::Debug for PcscTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcscTransport")
            .field("reader_name", &self.reader_name)
            .field("has_card", &self.card.is_some())
            .field("config", &self.config)
            .finish()
    }
}

impl PcscTransport {
    /// Connect to the card in `reader_name`
    pub fn connect(
        context: Context,
        reader_name: &str,
        config: PcscConfig,
    ) -> Result<Self, PcscError> {
        let mut transport = Self {
            context,
            card: None,
            reader_name: reader_name.to_owned(),
            config,
        };
        transport.connect_card()?;
        debug!(reader = %transport.reader_name, "Connected to card");
        Ok(transport)
    }

    fn connect_card(&mut self) -> Result<(), PcscError> {
        if self.card.is_some() {
            return Ok(());
        }
        let reader = CString::new(self.reader_name.as_str())
            .map_err(|_| PcscError::ReaderNotFound(self.reader_name.clone()))?;
        let card = self
            .context
            .connect(&reader, self.config.share_mode.into(), self.config.protocols)
            .map_err(|e| PcscError::from_card(e, &self.reader_name))?;
        self.card = Some(card);
        Ok(())
    }

    /// Get the ATR of the current card
    pub fn atr(&self) -> Result<Vec<u8>, PcscError> {
        let card = self
            .card
            .as_ref()
            .ok_or_else(|| PcscError::NoCard(self.reader_name.clone()))?;
        card.get_attribute_owned(pcsc::Attribute::AtrString)
            .map_err(|e| PcscError::from_card(e, &self.reader_name))
    }

    /// Get the reader name
    pub fn reader_name(&self) -> &str {
        &self.reader_name
    }

    fn transmit_command(&mut self, command: &[u8]) -> Result<Bytes, PcscError> {
        let card = self
            .card
            .as_mut()
            .ok_or_else(|| PcscError::NoCard(self.reader_name.clone()))?;
        let mut buffer = [0u8; MAX_BUFFER_SIZE];
        match card.transmit(command, &mut buffer) {
            Ok(response) => Ok(Bytes::copy_from_slice(response)),
            Err(e) => {
                let error = PcscError::from_card(e, &self.reader_name);
                if matches!(error, PcscError::CardRemoved | PcscError::CardReset) {
                    warn!(reader = %self.reader_name, %error, "Lost the card");
                    self.card = None;
                }
                Err(error)
            }
        }
    }
}

impl CardTransport for PcscTransport {
    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError> {
        self.transmit_command(command).map_err(TransportError::from)
    }

    fn is_connected(&self) -> bool {
        self.card.is_some()
    }

    fn reset(&mut self) -> Result<(), TransportError> {
        if let Some(card) = self.card.take()
            && let Err((_, e)) = card.disconnect(Disposition::ResetCard)
        {
            debug!(error = %e, "Disconnect during reset failed");
        }
        self.connect_card().map_err(Into::into)
    }
}

impl Drop for PcscTransport {
    fn drop(&mut self) {
        if let Some(card) = self.card.take() {
            let _ = card.disconnect(Disposition::LeaveCard);
        }
    }
}
