//! Core error type for APDU operations
//!
//! Every layer below the sessions reports failures through [`Error`]. Layer
//! specific errors convert into it with `?`, so a transport failure, a malformed
//! TLV and a rejected status word all reach the caller with their kind intact.

use crate::command::error::CommandError;
use crate::response::error::{ResponseError, StatusError};
use crate::tlv::TlvError;
use crate::transport::TransportError;

/// Result type alias for APDU operations
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Core error type that encompasses all possible errors in the crate
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    //
    // Transport related errors
    //
    /// Error reported by the physical transport
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Commands were submitted while the connection is not open
    #[error("Connection is not open")]
    NotConnected,

    /// The connection closed before the command completed
    #[error("Connection closed")]
    ConnectionClosed,

    /// The physical link went away while the command was outstanding
    #[error("Device disconnected")]
    Disconnected,

    //
    // Codec errors
    //
    /// Command could not be built or serialized
    #[error(transparent)]
    Command(#[from] CommandError),

    /// Response could not be parsed
    #[error(transparent)]
    Response(#[from] ResponseError),

    /// Malformed BER-TLV data
    #[error(transparent)]
    Tlv(#[from] TlvError),

    /// Device data did not match the protocol
    #[error("Protocol error: {0}")]
    Protocol(String),

    //
    // Application errors
    //
    /// Status word other than success returned by the card
    #[error(transparent)]
    Status(#[from] StatusError),

    /// Too many `61XX` continuations for a single command
    #[error("Chain limit exceeded after {0} continuations")]
    ChainLimitExceeded(usize),

    /// Another application was selected since the session was opened
    #[error("Session invalidated: another application is selected")]
    SessionInvalidated,

    //
    // Scheduling errors
    //
    /// Command watchdog expired
    #[error("Operation timed out")]
    Timeout,

    /// Entry was drained from the queue before it was sent
    #[error("Operation cancelled")]
    Cancelled,

    //
    // General errors
    //
    /// Context error with message and source error
    #[error("{context}: {source}")]
    Context {
        /// Contextual message
        context: String,
        /// Source error
        source: Box<Self>,
    },

    /// Generic dynamic error with string message
    #[error("{0}")]
    Message(String),
}

impl Error {
    /// Create a new error with context information
    pub fn with_context<S: Into<String>>(self, context: S) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Create a new error with a dynamic message
    pub fn message<S: Into<String>>(message: S) -> Self {
        Self::Message(message.into())
    }

    /// Create a new protocol error
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol(message.into())
    }

    /// Create a new status error
    pub const fn status(sw1: u8, sw2: u8) -> Self {
        Self::Status(StatusError::new(sw1, sw2))
    }

    /// The innermost error, skipping any context wrappers
    pub fn root(&self) -> &Self {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// The status error carried by this error, if any
    pub fn status_error(&self) -> Option<&StatusError> {
        match self.root() {
            Self::Status(status) => Some(status),
            Self::Response(ResponseError::Status(status)) => Some(status),
            _ => None,
        }
    }

    /// Whether the error was produced by `cancel_commands` or a cancellation token
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Self::Cancelled)
    }

    /// Whether the error was produced by the command watchdog
    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), Self::Timeout)
    }

    /// Whether the error means the device sent data the library cannot interpret
    pub fn is_protocol(&self) -> bool {
        matches!(
            self.root(),
            Self::Protocol(_) | Self::Tlv(_) | Self::Response(ResponseError::Incomplete)
        )
    }
}

/// Extension trait for Result with APDU Errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context<S: Into<String>>(self, context: S) -> Result<T, Error>;
}

impl<T, E: Into<Error>> ResultExt<T> for Result<T, E> {
    fn context<S: Into<String>>(self, context: S) -> Result<T, Error> {
        self.map_err(|e| e.into().with_context(context))
    }
}
