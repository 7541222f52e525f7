//! Error types for PC/SC transport

use ykit_apdu_core::transport::TransportError;

/// PC/SC-specific errors
#[derive(Debug, thiserror::Error)]
pub enum PcscError {
    /// PC/SC error
    #[error("PC/SC error: {0}")]
    Pcsc(#[from] pcsc::Error),

    /// Reader not found
    #[error("Reader not found: {0}")]
    ReaderNotFound(String),

    /// No card present in reader
    #[error("No card present in reader: {0}")]
    NoCard(String),

    /// Card was reset by another application
    #[error("Card was reset")]
    CardReset,

    /// Card was removed
    #[error("Card was removed")]
    CardRemoved,
}

impl PcscError {
    /// Classify a PC/SC error raised while talking to the card
    pub(crate) fn from_card(error: pcsc::Error, reader: &str) -> Self {
        match error {
            pcsc::Error::RemovedCard | pcsc::Error::ReaderUnavailable => Self::CardRemoved,
            pcsc::Error::ResetCard => Self::CardReset,
            pcsc::Error::NoSmartcard => Self::NoCard(reader.to_owned()),
            pcsc::Error::UnknownReader => Self::ReaderNotFound(reader.to_owned()),
            other => Self::Pcsc(other),
        }
    }
}

impl From<PcscError> for TransportError {
    fn from(error: PcscError) -> Self {
        match error {
            // a reset card has lost its application selection
            PcscError::CardRemoved | PcscError::CardReset | PcscError::NoCard(_) => Self::Removed,
            PcscError::ReaderNotFound(_) => Self::Connection,
            PcscError::Pcsc(e) => Self::other(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_card_errors_lose_the_link() {
        let reader = "Yubico YubiKey";
        for error in [pcsc::Error::RemovedCard, pcsc::Error::ResetCard, pcsc::Error::NoSmartcard] {
            let transport = TransportError::from(PcscError::from_card(error, reader));
            assert!(transport.is_link_lost(), "{error:?}");
        }
        let other =
            TransportError::from(PcscError::from_card(pcsc::Error::InsufficientBuffer, reader));
        assert!(!other.is_link_lost());
        assert!(matches!(
            PcscError::from_card(pcsc::Error::UnknownReader, reader),
            PcscError::ReaderNotFound(name) if name == reader
        ));
    }
}
