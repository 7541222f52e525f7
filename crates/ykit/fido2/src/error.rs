//! FIDO2 error type

use ykit_apdu_core::Error;

use crate::status::CtapStatus;

/// Result type for FIDO2 operations
pub type Result<T, E = Fido2Error> = std::result::Result<T, E>;

/// Error type for FIDO2 operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Fido2Error {
    /// Error from the connection or codec layers
    #[error(transparent)]
    Core(Error),

    /// The authenticator answered with a non-zero CTAP status
    #[error("CTAP error: {0}")]
    Ctap(CtapStatus),

    /// The response is not the CBOR the command defines
    #[error("Malformed CBOR: {0}")]
    Cbor(String),

    /// Key agreement or PIN encryption failed
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// The PIN does not meet the length rules
    #[error("Invalid PIN: {0}")]
    InvalidPin(String),

    /// The operation needs a PIN token from [`crate::Fido2Session::verify_pin`]
    #[error("PIN token required")]
    PinTokenRequired,

    /// Another application was selected since the session opened
    #[error("Session invalidated")]
    SessionInvalidated,
}

impl Fido2Error {
    pub(crate) fn cbor(message: impl Into<String>) -> Self {
        Self::Cbor(message.into())
    }

    pub(crate) fn crypto(message: impl Into<String>) -> Self {
        Self::Crypto(message.into())
    }

    /// CTAP status, if the authenticator reported one
    pub const fn ctap_status(&self) -> Option<CtapStatus> {
        match self {
            Self::Ctap(status) => Some(*status),
            _ => None,
        }
    }
}

impl From<Error> for Fido2Error {
    fn from(error: Error) -> Self {
        match error.root() {
            Error::SessionInvalidated => Self::SessionInvalidated,
            _ => Self::Core(error),
        }
    }
}

impl From<CtapStatus> for Fido2Error {
    fn from(status: CtapStatus) -> Self {
        Self::Ctap(status)
    }
}
