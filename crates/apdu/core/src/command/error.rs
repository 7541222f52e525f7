//! Error types specific to APDU commands

/// Command error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// Raw command bytes have an impossible length
    #[error("Invalid command length: {0}")]
    InvalidLength(usize),

    /// A single frame cannot carry this much data
    #[error("Command data of {len} bytes exceeds the frame limit of {max}")]
    DataTooLong {
        /// Data length requested
        len: usize,
        /// Frame limit
        max: usize,
    },

    /// Command data is inconsistent
    #[error("Invalid command data: {0}")]
    InvalidData(&'static str),

    /// Frame size of zero passed to the chaining logic
    #[error("Frame size must be non-zero")]
    ZeroFrameSize,
}
