//! Host side HOTP/TOTP math
//!
//! The key computes codes itself; these functions cover the password
//! handshake and let callers check codes against known secrets.

use std::time::{SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Sha256, Sha512};

use crate::constants::MAX_CODE_DIGITS;
use crate::credential::HashAlgorithm;
use crate::error::{OathError, Result};

fn mac<M: Mac + hmac::digest::KeyInit>(key: &[u8], message: &[u8]) -> Result<Vec<u8>> {
    let mut mac =
        <M as Mac>::new_from_slice(key).map_err(|_| OathError::invalid("unusable HMAC key"))?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// HMAC of `message` under `key`
pub fn hmac(algorithm: HashAlgorithm, key: &[u8], message: &[u8]) -> Result<Vec<u8>> {
    match algorithm {
        HashAlgorithm::Sha1 => mac::<Hmac<Sha1>>(key, message),
        HashAlgorithm::Sha256 => mac::<Hmac<Sha256>>(key, message),
        HashAlgorithm::Sha512 => mac::<Hmac<Sha512>>(key, message),
    }
}

/// RFC 4226 dynamic truncation of a full HMAC response
pub fn truncate(response: &[u8]) -> Result<u32> {
    let last = response.last().ok_or_else(|| OathError::protocol("empty response"))?;
    let offset = usize::from(last & 0x0F);
    let window = response
        .get(offset..offset + 4)
        .ok_or_else(|| OathError::protocol("response too short to truncate"))?;
    Ok(u32::from_be_bytes([window[0], window[1], window[2], window[3]]) & 0x7FFF_FFFF)
}

/// Zero-padded decimal code from a truncated value
///
/// `digits` must be between 1 and [`MAX_CODE_DIGITS`].
pub fn format_code(value: u32, digits: u8) -> Result<String> {
    if !(1..=MAX_CODE_DIGITS).contains(&digits) {
        return Err(OathError::invalid(format!("cannot format a {digits} digit code")));
    }
    let modulus = 10u64.pow(u32::from(digits));
    Ok(format!("{:0width$}", u64::from(value) % modulus, width = usize::from(digits)))
}

/// RFC 4226 code for `counter`
pub fn hotp(algorithm: HashAlgorithm, secret: &[u8], counter: u64, digits: u8) -> Result<String> {
    let response = hmac(algorithm, secret, &counter.to_be_bytes())?;
    format_code(truncate(&response)?, digits)
}

/// RFC 6238 code for the step containing `timestamp`
pub fn totp(
    algorithm: HashAlgorithm,
    secret: &[u8],
    timestamp: u64,
    period: u32,
    digits: u8,
) -> Result<String> {
    hotp(algorithm, secret, time_step(timestamp, period), digits)
}

/// Step number for `timestamp`; a zero period counts as one second
pub fn time_step(timestamp: u64, period: u32) -> u64 {
    timestamp / u64::from(period.max(1))
}

/// Current unix time in seconds
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RFC4226_SECRET: &[u8] = b"12345678901234567890";

    #[test]
    fn test_rfc4226_vectors() {
        let expected = ["755224", "287082", "359152", "969429", "338314"];
        for (counter, code) in expected.iter().enumerate() {
            let value = hotp(HashAlgorithm::Sha1, RFC4226_SECRET, counter as u64, 6).unwrap();
            assert_eq!(value, *code);
        }
    }

    #[test]
    fn test_rfc6238_vectors() {
        let sha256 = b"12345678901234567890123456789012";
        let sha512 = b"1234567890123456789012345678901234567890123456789012345678901234";
        assert_eq!(totp(HashAlgorithm::Sha1, RFC4226_SECRET, 59, 30, 8).unwrap(), "94287082");
        assert_eq!(totp(HashAlgorithm::Sha256, sha256, 59, 30, 8).unwrap(), "46119246");
        assert_eq!(totp(HashAlgorithm::Sha512, sha512, 59, 30, 8).unwrap(), "90693936");
        assert_eq!(
            totp(HashAlgorithm::Sha1, RFC4226_SECRET, 1_111_111_109, 30, 8).unwrap(),
            "07081804"
        );
    }

    #[test]
    fn test_truncate_rejects_short_response() {
        assert!(truncate(&[]).is_err());
        assert!(truncate(&[0x00, 0x01, 0x0F]).is_err());
    }

    #[test]
    fn test_format_code_pads() {
        assert_eq!(format_code(42, 6).unwrap(), "000042");
        assert_eq!(format_code(1_234_567_890, 8).unwrap(), "34567890");
        assert_eq!(format_code(0x7FFF_FFFF, 10).unwrap(), "2147483647");
    }

    #[test]
    fn test_digits_out_of_range() {
        assert!(format_code(42, 0).is_err());
        assert!(format_code(42, 11).is_err());
        assert!(hotp(HashAlgorithm::Sha1, RFC4226_SECRET, 0, 20).is_err());
        assert!(totp(HashAlgorithm::Sha1, RFC4226_SECRET, 59, 30, u8::MAX).is_err());
    }
}
