//! Credential model, ids and templates

use std::fmt;

use derive_more::Display;
use sha1::{Digest, Sha1};
use sha2::{Sha256, Sha512};
use zeroize::Zeroizing;

use crate::constants::{DEFAULT_DIGITS, DEFAULT_PERIOD, MAX_ID_LEN, MIN_SECRET_LEN};
use crate::error::{OathError, Result};

/// Kind of one-time password
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OathType {
    /// Counter based (RFC 4226)
    #[display("HOTP")]
    Hotp,
    /// Time based (RFC 6238)
    #[display("TOTP")]
    Totp,
}

impl OathType {
    /// High nibble of the type/algorithm byte
    pub const fn code(self) -> u8 {
        match self {
            Self::Hotp => 0x10,
            Self::Totp => 0x20,
        }
    }

    /// Type from a type/algorithm byte
    pub const fn from_code(code: u8) -> Option<Self> {
        match code & 0xF0 {
            0x10 => Some(Self::Hotp),
            0x20 => Some(Self::Totp),
            _ => None,
        }
    }
}

/// HMAC hash function of a credential
#[derive(Debug, Display, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    /// HMAC-SHA1
    #[default]
    #[display("SHA1")]
    Sha1,
    /// HMAC-SHA256
    #[display("SHA256")]
    Sha256,
    /// HMAC-SHA512
    #[display("SHA512")]
    Sha512,
}

impl HashAlgorithm {
    /// Low nibble of the type/algorithm byte
    pub const fn code(self) -> u8 {
        match self {
            Self::Sha1 => 0x01,
            Self::Sha256 => 0x02,
            Self::Sha512 => 0x03,
        }
    }

    /// Algorithm from a type/algorithm byte
    pub const fn from_code(code: u8) -> Option<Self> {
        match code & 0x0F {
            0x01 => Some(Self::Sha1),
            0x02 => Some(Self::Sha256),
            0x03 => Some(Self::Sha512),
            _ => None,
        }
    }

    /// Hash block size; longer HMAC keys are hashed first
    pub const fn block_size(self) -> usize {
        match self {
            Self::Sha1 | Self::Sha256 => 64,
            Self::Sha512 => 128,
        }
    }

    /// Hash `data`
    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha1 => Sha1::digest(data).to_vec(),
            Self::Sha256 => Sha256::digest(data).to_vec(),
            Self::Sha512 => Sha512::digest(data).to_vec(),
        }
    }
}

/// Build a credential id: `[period/][issuer:]account`
///
/// The period prefix is only written for TOTP credentials whose period is not
/// the default.
pub fn format_id(oath_type: OathType, issuer: Option<&str>, account: &str, period: u32) -> String {
    let mut id = String::new();
    if oath_type == OathType::Totp && period != DEFAULT_PERIOD {
        id.push_str(&format!("{period}/"));
    }
    if let Some(issuer) = issuer {
        id.push_str(issuer);
        id.push(':');
    }
    id.push_str(account);
    id
}

/// Split a credential id into issuer, account and period
///
/// A leading `period/` is only taken as the period when it differs from the
/// default, the inverse of [`format_id`]; `30/Acme:bob` keeps `30/Acme` as
/// its issuer.
pub fn parse_id(id: &str, oath_type: OathType) -> (Option<String>, String, u32) {
    let (period, rest) = match oath_type {
        OathType::Hotp => (0, id),
        OathType::Totp => id
            .split_once('/')
            .filter(|(prefix, _)| !prefix.is_empty() && prefix.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|(prefix, rest)| prefix.parse().ok().map(|period| (period, rest)))
            .filter(|(period, _)| *period != DEFAULT_PERIOD)
            .unwrap_or((DEFAULT_PERIOD, id)),
    };
    match rest.split_once(':') {
        Some((issuer, account)) if !issuer.is_empty() => {
            (Some(issuer.to_owned()), account.to_owned(), period)
        }
        _ => (None, rest.to_owned(), period),
    }
}

/// Credential stored on the key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Credential {
    /// HOTP or TOTP
    pub oath_type: OathType,
    /// HMAC hash function
    pub algorithm: HashAlgorithm,
    /// Issuer, if the id names one
    pub issuer: Option<String>,
    /// Account name
    pub account: String,
    /// TOTP period in seconds; `0` for HOTP
    pub period: u32,
    /// Whether calculating a code needs a touch
    pub requires_touch: bool,
}

impl Credential {
    /// Credential described by its raw id
    pub fn from_id(id: &[u8], oath_type: OathType, algorithm: HashAlgorithm) -> Result<Self> {
        let id = std::str::from_utf8(id)
            .map_err(|_| OathError::protocol("credential id is not UTF-8"))?;
        let (issuer, account, period) = parse_id(id, oath_type);
        Ok(Self {
            oath_type,
            algorithm,
            issuer,
            account,
            period,
            requires_touch: false,
        })
    }

    /// Id the key stores the credential under
    pub fn id(&self) -> String {
        format_id(self.oath_type, self.issuer.as_deref(), &self.account, self.period)
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.issuer {
            Some(issuer) => write!(f, "{issuer} ({})", self.account),
            None => f.write_str(&self.account),
        }
    }
}

/// One-time code and the interval it is valid for
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Code {
    /// Zero-padded code
    pub value: String,
    /// Unix time the code becomes valid
    pub valid_from: u64,
    /// Unix time the code expires; `None` for HOTP codes
    pub valid_until: Option<u64>,
}

impl Code {
    /// Code with the validity of `credential` at `timestamp`
    pub fn new(value: String, credential: &Credential, timestamp: u64) -> Self {
        match credential.oath_type {
            OathType::Totp => {
                let period = u64::from(credential.period.max(1));
                Self {
                    value,
                    valid_from: timestamp,
                    valid_until: Some(timestamp.saturating_add(period)),
                }
            }
            OathType::Hotp => Self {
                value,
                valid_from: timestamp,
                valid_until: None,
            },
        }
    }

    /// Whether the code is valid at `timestamp`
    pub fn is_valid_at(&self, timestamp: u64) -> bool {
        timestamp >= self.valid_from && self.valid_until.is_none_or(|until| timestamp < until)
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// Credential paired with its code from CALCULATE ALL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialWithCode {
    /// The credential
    pub credential: Credential,
    /// Code; `None` for HOTP and touch credentials, which need an explicit calculate
    pub code: Option<Code>,
}

/// Everything needed to store a new credential
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialTemplate {
    /// HOTP or TOTP
    pub oath_type: OathType,
    /// HMAC hash function
    pub algorithm: HashAlgorithm,
    /// Issuer
    pub issuer: Option<String>,
    /// Account name
    pub account: String,
    /// Code length, 6 to 8
    pub digits: u8,
    /// TOTP period in seconds
    pub period: u32,
    /// Initial HOTP counter
    pub counter: u32,
    secret: Zeroizing<Vec<u8>>,
}

impl fmt::Debug for CredentialTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialTemplate")
            .field("oath_type", &self.oath_type)
            .field("algorithm", &self.algorithm)
            .field("issuer", &self.issuer)
            .field("account", &self.account)
            .field("digits", &self.digits)
            .field("period", &self.period)
            .field("counter", &self.counter)
            .finish_non_exhaustive()
    }
}

impl CredentialTemplate {
    /// TOTP template with default digits and period
    pub fn totp(
        algorithm: HashAlgorithm,
        secret: impl Into<Vec<u8>>,
        issuer: Option<&str>,
        account: &str,
    ) -> Self {
        Self {
            oath_type: OathType::Totp,
            algorithm,
            issuer: issuer.map(str::to_owned),
            account: account.to_owned(),
            digits: DEFAULT_DIGITS,
            period: DEFAULT_PERIOD,
            counter: 0,
            secret: Zeroizing::new(secret.into()),
        }
    }

    /// HOTP template with default digits, starting at counter 0
    pub fn hotp(
        algorithm: HashAlgorithm,
        secret: impl Into<Vec<u8>>,
        issuer: Option<&str>,
        account: &str,
    ) -> Self {
        Self {
            oath_type: OathType::Hotp,
            period: 0,
            ..Self::totp(algorithm, secret, issuer, account)
        }
    }

    /// Set the number of digits
    pub const fn with_digits(mut self, digits: u8) -> Self {
        self.digits = digits;
        self
    }

    /// Set the TOTP period
    pub const fn with_period(mut self, period: u32) -> Self {
        self.period = period;
        self
    }

    /// Set the initial HOTP counter
    pub const fn with_counter(mut self, counter: u32) -> Self {
        self.counter = counter;
        self
    }

    /// Raw secret
    pub fn secret(&self) -> &[u8] {
        &self.secret
    }

    /// Id the credential will be stored under
    pub fn id(&self) -> String {
        format_id(self.oath_type, self.issuer.as_deref(), &self.account, self.period)
    }

    /// Check the template can be stored
    pub fn validate(&self) -> Result<()> {
        if self.account.is_empty() {
            return Err(OathError::invalid("account name is empty"));
        }
        if !(6..=8).contains(&self.digits) {
            return Err(OathError::invalid(format!("{} digits is not 6, 7 or 8", self.digits)));
        }
        if self.oath_type == OathType::Totp && self.period == 0 {
            return Err(OathError::invalid("TOTP period is zero"));
        }
        if self.secret.is_empty() {
            return Err(OathError::invalid("secret is empty"));
        }
        let id_len = self.id().len();
        if id_len > MAX_ID_LEN {
            return Err(OathError::invalid(format!("id is {id_len} bytes, limit is {MAX_ID_LEN}")));
        }
        Ok(())
    }

    /// Secret as stored by the applet
    ///
    /// Secrets longer than the hash block size are hashed, then the result is
    /// zero-padded to the applet minimum.
    pub fn key_material(&self) -> Zeroizing<Vec<u8>> {
        let mut key = if self.secret.len() > self.algorithm.block_size() {
            self.algorithm.digest(&self.secret)
        } else {
            self.secret.to_vec()
        };
        if key.len() < MIN_SECRET_LEN {
            key.resize(MIN_SECRET_LEN, 0);
        }
        Zeroizing::new(key)
    }

    /// Credential the key will list after the template is stored
    pub fn credential(&self, requires_touch: bool) -> Credential {
        Credential {
            oath_type: self.oath_type,
            algorithm: self.algorithm,
            issuer: self.issuer.clone(),
            account: self.account.clone(),
            period: self.period,
            requires_touch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_round_trip() {
        let id = format_id(OathType::Totp, Some("GitHub"), "octocat", 30);
        assert_eq!(id, "GitHub:octocat");
        assert_eq!(parse_id(&id, OathType::Totp), (Some("GitHub".into()), "octocat".into(), 30));

        let id = format_id(OathType::Totp, Some("Steam"), "gabe", 60);
        assert_eq!(id, "60/Steam:gabe");
        assert_eq!(parse_id(&id, OathType::Totp), (Some("Steam".into()), "gabe".into(), 60));
    }

    #[test]
    fn test_parse_id_edge_cases() {
        assert_eq!(parse_id("alice", OathType::Totp), (None, "alice".into(), 30));
        assert_eq!(parse_id("a/b:c", OathType::Totp), (Some("a/b".into()), "c".into(), 30));
        assert_eq!(
            parse_id("15/Acme:bob", OathType::Hotp),
            (Some("15/Acme".into()), "bob".into(), 0)
        );
        assert_eq!(parse_id(":bob", OathType::Totp), (None, ":bob".into(), 30));
    }

    #[test]
    fn test_issuer_that_looks_like_a_period() {
        let id = format_id(OathType::Totp, Some("30/Acme"), "bob", 30);
        assert_eq!(id, "30/Acme:bob");
        assert_eq!(parse_id(&id, OathType::Totp), (Some("30/Acme".into()), "bob".into(), 30));

        let id = format_id(OathType::Totp, Some("30/Acme"), "bob", 60);
        assert_eq!(id, "60/30/Acme:bob");
        assert_eq!(parse_id(&id, OathType::Totp), (Some("30/Acme".into()), "bob".into(), 60));
    }

    #[test]
    fn test_type_algorithm_byte() {
        assert_eq!(OathType::from_code(0x21), Some(OathType::Totp));
        assert_eq!(HashAlgorithm::from_code(0x21), Some(HashAlgorithm::Sha1));
        assert_eq!(HashAlgorithm::from_code(0x13), Some(HashAlgorithm::Sha512));
        assert_eq!(OathType::from_code(0x31), None);
    }

    #[test]
    fn test_key_material() {
        let short = CredentialTemplate::totp(HashAlgorithm::Sha1, b"abc".to_vec(), None, "a");
        assert_eq!(short.key_material().as_slice(), b"abc\0\0\0\0\0\0\0\0\0\0\0");

        let long = CredentialTemplate::totp(HashAlgorithm::Sha256, vec![0x42; 65], None, "a");
        assert_eq!(long.key_material().len(), 32);

        let block = CredentialTemplate::totp(HashAlgorithm::Sha512, vec![0x42; 128], None, "a");
        assert_eq!(block.key_material().len(), 128);
    }

    #[test]
    fn test_validate() {
        let template =
            CredentialTemplate::totp(HashAlgorithm::Sha1, vec![1; 20], Some("Acme"), "bob");
        assert!(template.validate().is_ok());
        assert!(template.clone().with_digits(9).validate().is_err());
        assert!(template.clone().with_period(0).validate().is_err());
        let account = "x".repeat(65);
        let long = CredentialTemplate::totp(HashAlgorithm::Sha1, vec![1; 20], None, &account);
        assert!(long.validate().is_err());
    }

    #[test]
    fn test_code_validity() {
        let totp =
            CredentialTemplate::totp(HashAlgorithm::Sha1, vec![1], None, "a").credential(false);
        let code = Code::new("123456".into(), &totp, 65);
        assert_eq!((code.valid_from, code.valid_until), (65, Some(95)));
        assert!(code.is_valid_at(94));
        assert!(!code.is_valid_at(95));
        assert!(!code.is_valid_at(64));

        let hotp =
            CredentialTemplate::hotp(HashAlgorithm::Sha1, vec![1], None, "a").credential(false);
        let code = Code::new("123456".into(), &hotp, 65);
        assert_eq!(code.valid_until, None);
        assert!(code.is_valid_at(u64::MAX));
    }
}
