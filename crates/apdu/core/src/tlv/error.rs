//! Error types for the BER-TLV codec

/// Malformed or unsupported BER-TLV data
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TlvError {
    /// Input ended in the middle of a tag or length field
    #[error("TLV data truncated")]
    Truncated,

    /// Declared length runs past the end of the input
    #[error("TLV length {declared} exceeds the {available} bytes available")]
    LengthOverflow {
        /// Length announced by the record
        declared: usize,
        /// Bytes left in the buffer
        available: usize,
    },

    /// Length byte `0x80` (indefinite form)
    #[error("Indefinite TLV length is not supported")]
    IndefiniteLength,

    /// Long-form length using more than four bytes
    #[error("Unsupported TLV length form {0:#04x}")]
    UnsupportedLength(u8),

    /// Value too long for the four-byte long form
    #[error("TLV value of {0} bytes is too long to encode")]
    ValueTooLong(usize),

    /// Tag bytes do not form a valid BER tag
    #[error("Invalid TLV tag {0:#x}")]
    InvalidTag(u64),

    /// Bytes left over after a single record
    #[error("{0} trailing bytes after TLV record")]
    TrailingData(usize),

    /// The requested tag does not occur at the top level
    #[error("TLV tag {0:#x} not found")]
    TagNotFound(u64),
}
