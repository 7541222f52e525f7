//! YKOATH protocol constants

/// Default TOTP period in seconds
pub const DEFAULT_PERIOD: u32 = 30;

/// Default number of code digits
pub const DEFAULT_DIGITS: u8 = 6;

/// Longest code a truncated 31-bit value can fill
pub const MAX_CODE_DIGITS: u8 = 10;

/// Shortest secret the applet accepts; shorter secrets are zero-padded
pub const MIN_SECRET_LEN: usize = 14;

/// Longest credential id the applet stores
pub const MAX_ID_LEN: usize = 64;

/// PBKDF2 iterations used to derive the access key from a password
pub const PBKDF2_ITERATIONS: u32 = 1000;

/// Length of the derived access key
pub const ACCESS_KEY_LEN: usize = 16;

/// Length of the host challenge sent with VALIDATE
pub const CHALLENGE_LEN: usize = 8;

/// Instruction bytes
#[allow(missing_docs)]
pub mod ins {
    pub const PUT: u8 = 0x01;
    pub const DELETE: u8 = 0x02;
    pub const SET_CODE: u8 = 0x03;
    pub const RESET: u8 = 0x04;
    pub const RENAME: u8 = 0x05;
    pub const LIST: u8 = 0xA1;
    pub const CALCULATE: u8 = 0xA2;
    pub const VALIDATE: u8 = 0xA3;
    pub const CALCULATE_ALL: u8 = 0xA4;
    pub const SEND_REMAINING: u8 = 0xA5;
}

/// BER-TLV tags
pub mod tags {
    /// Credential id, or the salt in the SELECT response
    pub const NAME: u64 = 0x71;
    /// LIST record: `[type | algorithm][id]`
    pub const NAME_LIST: u64 = 0x72;
    /// Key material: `[type | algorithm][digits][secret]`
    pub const KEY: u64 = 0x73;
    /// Challenge
    pub const CHALLENGE: u64 = 0x74;
    /// Full HMAC response
    pub const RESPONSE: u64 = 0x75;
    /// Truncated response: `[digits][4 bytes]`
    pub const TRUNCATED_RESPONSE: u64 = 0x76;
    /// HOTP credential, no code calculated
    pub const NO_RESPONSE: u64 = 0x77;
    /// Credential properties
    pub const PROPERTY: u64 = 0x78;
    /// Applet version
    pub const VERSION: u64 = 0x79;
    /// Initial moving factor (HOTP counter)
    pub const IMF: u64 = 0x7A;
    /// Algorithm of the access key
    pub const ALGORITHM: u64 = 0x7B;
    /// Credential requires touch, no code calculated
    pub const TOUCH: u64 = 0x7C;
}

/// PROPERTY value requiring touch
pub const PROPERTY_REQUIRE_TOUCH: u8 = 0x02;

/// Status words with an OATH specific meaning
#[allow(missing_docs)]
pub mod status {
    pub const AUTH_REQUIRED: u16 = 0x6982;
    pub const WRONG_SYNTAX: u16 = 0x6A80;
    pub const NO_SUCH_OBJECT: u16 = 0x6984;
    pub const NO_SPACE: u16 = 0x6A84;
    pub const GENERIC_ERROR: u16 = 0x6581;
}
