use bytes::Bytes;

use super::{Body, oath_command};
use crate::constants::{ins, tags};
use crate::error::Result;

oath_command! {
    /// CALCULATE: code or full HMAC response for one credential
    Calculate => ins::CALCULATE
}

impl Calculate {
    /// Truncated code (`0x76` response) for `id`
    ///
    /// HOTP credentials take an empty challenge; the key uses its stored counter.
    pub fn truncated(id: &str, challenge: &[u8]) -> Result<Self> {
        Ok(Self::raw(0x00, 0x01, body(id, challenge)?))
    }

    /// Full HMAC response (`0x75` response) for `id`
    pub fn full(id: &str, challenge: &[u8]) -> Result<Self> {
        Ok(Self::raw(0x00, 0x00, body(id, challenge)?))
    }
}

fn body(id: &str, challenge: &[u8]) -> Result<Bytes> {
    Ok(Body::default()
        .tlv(tags::NAME, id.as_bytes())?
        .tlv(tags::CHALLENGE, challenge)?
        .finish())
}

oath_command! {
    /// CALCULATE ALL: truncated codes for every TOTP credential
    CalculateAll => ins::CALCULATE_ALL
}

impl CalculateAll {
    /// Calculate with the given challenge
    pub fn new(challenge: &[u8]) -> Result<Self> {
        let data = Body::default().tlv(tags::CHALLENGE, challenge)?.finish();
        Ok(Self::raw(0x00, 0x01, data))
    }
}

#[cfg(test)]
mod tests {
    use ykit_apdu_core::ApduCommand;

    use super::*;

    #[test]
    fn test_calculate_encoding() {
        let command = Calculate::truncated("a:b", &[0, 0, 0, 0, 0, 0, 0, 1]).unwrap();
        assert_eq!(
            hex::encode(command.to_bytes()),
            "00a200010f".to_owned() + "7103613a62" + "74080000000000000001"
        );
        let command = Calculate::full("x", &[0xAA]).unwrap();
        assert_eq!(command.p2(), 0x00);
    }

    #[test]
    fn test_calculate_all_encoding() {
        let command = CalculateAll::new(&[0; 8]).unwrap();
        assert_eq!(hex::encode(command.to_bytes()), "00a400010a74080000000000000000");
    }
}
