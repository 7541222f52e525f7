//! CTAP2 status codes

use derive_more::Display;

/// Status byte leading every CTAP2 response
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum CtapStatus {
    #[display("Invalid command")]
    InvalidCommand,
    #[display("Invalid parameter")]
    InvalidParameter,
    #[display("Invalid length")]
    InvalidLength,
    #[display("Invalid message sequencing")]
    InvalidSeq,
    #[display("Message timed out")]
    Timeout,
    #[display("Channel busy")]
    ChannelBusy,
    #[display("Command requires channel lock")]
    LockRequired,
    #[display("Invalid channel")]
    InvalidChannel,
    #[display("Unexpected CBOR type")]
    CborUnexpectedType,
    #[display("Invalid CBOR")]
    InvalidCbor,
    #[display("Missing parameter")]
    MissingParameter,
    #[display("Limit exceeded")]
    LimitExceeded,
    #[display("Unsupported extension")]
    UnsupportedExtension,
    #[display("Credential excluded")]
    CredentialExcluded,
    #[display("Processing")]
    Processing,
    #[display("Invalid credential")]
    InvalidCredential,
    #[display("User action pending")]
    UserActionPending,
    #[display("Operation pending")]
    OperationPending,
    #[display("No operations")]
    NoOperations,
    #[display("Unsupported algorithm")]
    UnsupportedAlgorithm,
    #[display("Operation denied")]
    OperationDenied,
    #[display("Key store full")]
    KeyStoreFull,
    #[display("Not busy")]
    NotBusy,
    #[display("No operation pending")]
    NoOperationPending,
    #[display("Unsupported option")]
    UnsupportedOption,
    #[display("Invalid option")]
    InvalidOption,
    #[display("Keep-alive cancelled")]
    KeepaliveCancel,
    #[display("No credentials")]
    NoCredentials,
    #[display("User action timed out")]
    UserActionTimeout,
    #[display("Not allowed")]
    NotAllowed,
    #[display("PIN invalid")]
    PinInvalid,
    #[display("PIN blocked")]
    PinBlocked,
    #[display("PIN auth invalid")]
    PinAuthInvalid,
    #[display("PIN auth blocked")]
    PinAuthBlocked,
    #[display("PIN not set")]
    PinNotSet,
    #[display("PIN required")]
    PinRequired,
    #[display("PIN policy violation")]
    PinPolicyViolation,
    #[display("PIN token expired")]
    PinTokenExpired,
    #[display("Request too large")]
    RequestTooLarge,
    #[display("Action timed out")]
    ActionTimeout,
    #[display("User presence required")]
    UpRequired,
    #[display("Other error")]
    Other,
    #[display("Extension error {_0:#04x}")]
    Extension(u8),
    #[display("Vendor error {_0:#04x}")]
    Vendor(u8),
    #[display("Unknown status {_0:#04x}")]
    Unknown(u8),
}

impl CtapStatus {
    /// Status for a non-zero status byte
    pub const fn from_code(code: u8) -> Self {
        match code {
            0x01 => Self::InvalidCommand,
            0x02 => Self::InvalidParameter,
            0x03 => Self::InvalidLength,
            0x04 => Self::InvalidSeq,
            0x05 => Self::Timeout,
            0x06 => Self::ChannelBusy,
            0x0A => Self::LockRequired,
            0x0B => Self::InvalidChannel,
            0x11 => Self::CborUnexpectedType,
            0x12 => Self::InvalidCbor,
            0x14 => Self::MissingParameter,
            0x15 => Self::LimitExceeded,
            0x16 => Self::UnsupportedExtension,
            0x19 => Self::CredentialExcluded,
            0x21 => Self::Processing,
            0x22 => Self::InvalidCredential,
            0x23 => Self::UserActionPending,
            0x24 => Self::OperationPending,
            0x25 => Self::NoOperations,
            0x26 => Self::UnsupportedAlgorithm,
            0x27 => Self::OperationDenied,
            0x28 => Self::KeyStoreFull,
            0x29 => Self::NotBusy,
            0x2A => Self::NoOperationPending,
            0x2B => Self::UnsupportedOption,
            0x2C => Self::InvalidOption,
            0x2D => Self::KeepaliveCancel,
            0x2E => Self::NoCredentials,
            0x2F => Self::UserActionTimeout,
            0x30 => Self::NotAllowed,
            0x31 => Self::PinInvalid,
            0x32 => Self::PinBlocked,
            0x33 => Self::PinAuthInvalid,
            0x34 => Self::PinAuthBlocked,
            0x35 => Self::PinNotSet,
            0x36 => Self::PinRequired,
            0x37 => Self::PinPolicyViolation,
            0x38 => Self::PinTokenExpired,
            0x39 => Self::RequestTooLarge,
            0x3A => Self::ActionTimeout,
            0x3B => Self::UpRequired,
            0x7F => Self::Other,
            0xE0..=0xEF => Self::Extension(code),
            0xF0..=0xFF => Self::Vendor(code),
            _ => Self::Unknown(code),
        }
    }

    /// Wire value
    pub const fn code(self) -> u8 {
        match self {
            Self::InvalidCommand => 0x01,
            Self::InvalidParameter => 0x02,
            Self::InvalidLength => 0x03,
            Self::InvalidSeq => 0x04,
            Self::Timeout => 0x05,
            Self::ChannelBusy => 0x06,
            Self::LockRequired => 0x0A,
            Self::InvalidChannel => 0x0B,
            Self::CborUnexpectedType => 0x11,
            Self::InvalidCbor => 0x12,
            Self::MissingParameter => 0x14,
            Self::LimitExceeded => 0x15,
            Self::UnsupportedExtension => 0x16,
            Self::CredentialExcluded => 0x19,
            Self::Processing => 0x21,
            Self::InvalidCredential => 0x22,
            Self::UserActionPending => 0x23,
            Self::OperationPending => 0x24,
            Self::NoOperations => 0x25,
            Self::UnsupportedAlgorithm => 0x26,
            Self::OperationDenied => 0x27,
            Self::KeyStoreFull => 0x28,
            Self::NotBusy => 0x29,
            Self::NoOperationPending => 0x2A,
            Self::UnsupportedOption => 0x2B,
            Self::InvalidOption => 0x2C,
            Self::KeepaliveCancel => 0x2D,
            Self::NoCredentials => 0x2E,
            Self::UserActionTimeout => 0x2F,
            Self::NotAllowed => 0x30,
            Self::PinInvalid => 0x31,
            Self::PinBlocked => 0x32,
            Self::PinAuthInvalid => 0x33,
            Self::PinAuthBlocked => 0x34,
            Self::PinNotSet => 0x35,
            Self::PinRequired => 0x36,
            Self::PinPolicyViolation => 0x37,
            Self::PinTokenExpired => 0x38,
            Self::RequestTooLarge => 0x39,
            Self::ActionTimeout => 0x3A,
            Self::UpRequired => 0x3B,
            Self::Other => 0x7F,
            Self::Extension(code) | Self::Vendor(code) | Self::Unknown(code) => code,
        }
    }

    /// Whether the status concerns the PIN
    pub const fn is_pin_error(self) -> bool {
        matches!(self.code(), 0x31..=0x38)
    }
}
