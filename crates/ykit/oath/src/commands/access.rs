use bytes::Bytes;

use super::{Body, oath_command};
use crate::constants::{ins, tags};
use crate::credential::HashAlgorithm;
use crate::error::Result;

oath_command! {
    /// VALIDATE: prove knowledge of the access key
    Validate => ins::VALIDATE
}

impl Validate {
    /// Answer the key's challenge with `response` and send our own `challenge`
    pub fn new(response: &[u8], challenge: &[u8]) -> Result<Self> {
        let data = Body::default()
            .tlv(tags::RESPONSE, response)?
            .tlv(tags::CHALLENGE, challenge)?
            .finish();
        Ok(Self::raw(0x00, 0x00, data))
    }
}

oath_command! {
    /// SET CODE: set or remove the access key
    SetCode => ins::SET_CODE
}

impl SetCode {
    /// Protect the applet with `key`
    ///
    /// `challenge` and `response` prove the key to the applet:
    /// `response = HMAC(key, challenge)`.
    pub fn new(
        algorithm: HashAlgorithm,
        key: &[u8],
        challenge: &[u8],
        response: &[u8],
    ) -> Result<Self> {
        let mut key_record = Vec::with_capacity(1 + key.len());
        key_record.push(crate::credential::OathType::Totp.code() | algorithm.code());
        key_record.extend_from_slice(key);
        let body = Body::default()
            .tlv(tags::KEY, &key_record)?
            .tlv(tags::CHALLENGE, challenge)?
            .tlv(tags::RESPONSE, response)?;
        key_record.fill(0);
        Ok(Self::raw(0x00, 0x00, body.finish()))
    }

    /// Remove the access key
    pub fn remove() -> Result<Self> {
        Ok(Self::raw(0x00, 0x00, Body::default().tlv(tags::KEY, &[])?.finish()))
    }
}

oath_command! {
    /// RESET: wipe every credential and the access key
    Reset => ins::RESET
}

impl Reset {
    /// Reset the applet
    pub fn new() -> Self {
        Self::raw(0xDE, 0xAD, Bytes::new())
    }
}

impl Default for Reset {
    fn default() -> Self {
        Self::new()
    }
}
