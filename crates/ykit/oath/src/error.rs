//! OATH error type

use ykit_apdu_core::Error;
use ykit_apdu_core::tlv::TlvError;

use crate::constants::status;
use crate::version::Version;

/// Result type for OATH operations
pub type Result<T, E = OathError> = std::result::Result<T, E>;

/// Error type for OATH operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OathError {
    /// Error from the connection or codec layers
    #[error(transparent)]
    Core(Error),

    /// The applet is password protected and the session is not unlocked
    #[error("Authentication required")]
    AuthenticationRequired,

    /// The password did not produce the expected response
    #[error("Wrong password")]
    WrongPassword,

    /// No credential with the given id
    #[error("No such credential")]
    NoSuchObject,

    /// The applet has no room for another credential
    #[error("No space left on the key")]
    NoSpace,

    /// The applet rejected the command data
    #[error("Wrong syntax")]
    WrongSyntax,

    /// Unspecified applet failure
    #[error("Generic applet error")]
    GenericError,

    /// The operation needs newer firmware
    #[error("{operation} requires firmware {required}, key has {actual}")]
    Unsupported {
        /// Operation that was attempted
        operation: &'static str,
        /// Minimum firmware
        required: Version,
        /// Firmware of the key
        actual: Version,
    },

    /// Credential or template data is invalid
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    /// Another application was selected since the session opened
    #[error("Session invalidated")]
    SessionInvalidated,

    /// The applet returned data that does not follow the protocol
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl OathError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidCredential(message.into())
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }
}

impl From<Error> for OathError {
    fn from(error: Error) -> Self {
        if let Some(status) = error.status_error() {
            match status.status.to_u16() {
                status::AUTH_REQUIRED => return Self::AuthenticationRequired,
                status::NO_SUCH_OBJECT => return Self::NoSuchObject,
                status::NO_SPACE => return Self::NoSpace,
                status::WRONG_SYNTAX => return Self::WrongSyntax,
                status::GENERIC_ERROR => return Self::GenericError,
                _ => {}
            }
        }
        match error.root() {
            Error::SessionInvalidated => Self::SessionInvalidated,
            root if root.is_protocol() => Self::Protocol(error.to_string()),
            _ => Self::Core(error),
        }
    }
}

impl From<TlvError> for OathError {
    fn from(error: TlvError) -> Self {
        Self::Protocol(error.to_string())
    }
}
