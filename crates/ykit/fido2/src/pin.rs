//! CTAP2 PIN protocol one
//!
//! PIN material never leaves the host in clear: every request that carries it
//! is encrypted under a secret agreed with the authenticator over P-256.

use aes::Aes256;
use cipher::block_padding::NoPadding;
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use p256::ecdh::EphemeralSecret;
use p256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use p256::{EncodedPoint, PublicKey};
use rand_v8::rngs::OsRng;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::cbor::{self, MapBuilder, MapReader, Value};
use crate::error::{Fido2Error, Result};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// PIN protocol version sent with every PIN request
pub const PIN_PROTOCOL: i64 = 1;

/// Shortest PIN in bytes
pub const MIN_PIN_LEN: usize = 4;

/// Longest PIN in bytes
pub const MAX_PIN_LEN: usize = 63;

/// Length the PIN is zero-padded to before encryption
const PADDED_PIN_LEN: usize = 64;

/// COSE algorithm for ECDH-ES+HKDF-256 key agreement keys
const COSE_ALG_ECDH_ES_HKDF_256: i64 = -25;

/// Check a PIN's length
pub fn validate_pin(pin: &str) -> Result<()> {
    let len = pin.len();
    if len < MIN_PIN_LEN {
        return Err(Fido2Error::InvalidPin(format!("PIN must be at least {MIN_PIN_LEN} bytes")));
    }
    if len > MAX_PIN_LEN {
        return Err(Fido2Error::InvalidPin(format!("PIN must be at most {MAX_PIN_LEN} bytes")));
    }
    Ok(())
}

/// AES-256-CBC with a zero IV over whole blocks
pub fn encrypt(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut buffer = plaintext.to_vec();
    let len = Aes256CbcEnc::new(key.into(), &[0u8; 16].into())
        .encrypt_padded_mut::<NoPadding>(&mut buffer, plaintext.len())
        .map_err(|_| Fido2Error::crypto("plaintext is not a whole number of blocks"))?
        .len();
    buffer.truncate(len);
    Ok(buffer)
}

/// Inverse of [`encrypt`]
pub fn decrypt(key: &[u8; 32], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let mut buffer = ciphertext.to_vec();
    let len = Aes256CbcDec::new(key.into(), &[0u8; 16].into())
        .decrypt_padded_mut::<NoPadding>(&mut buffer)
        .map_err(|_| Fido2Error::crypto("ciphertext is not a whole number of blocks"))?
        .len();
    buffer.truncate(len);
    Ok(buffer)
}

/// `LEFT(HMAC-SHA-256(key, message), 16)`
pub fn authenticate(key: &[u8], message: &[u8]) -> Result<[u8; 16]> {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
        .map_err(|_| Fido2Error::crypto("unusable HMAC key"))?;
    mac.update(message);
    let digest = mac.finalize().into_bytes();
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest[..16]);
    Ok(out)
}

/// `LEFT(SHA-256(pin), 16)`
pub fn pin_hash(pin: &str) -> [u8; 16] {
    let digest = Sha256::digest(pin.as_bytes());
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest[..16]);
    out
}

/// PIN zero-padded to 64 bytes
pub fn pad_pin(pin: &str) -> Result<Zeroizing<Vec<u8>>> {
    validate_pin(pin)?;
    let mut padded = Zeroizing::new(vec![0u8; PADDED_PIN_LEN]);
    padded[..pin.len()].copy_from_slice(pin.as_bytes());
    Ok(padded)
}

/// COSE_Key map for a P-256 public key
pub fn cose_key(key: &PublicKey) -> Value {
    let point = key.to_encoded_point(false);
    let coordinate =
        |c: Option<&p256::FieldBytes>| cbor::bytes(c.map_or(&[][..], |c| c.as_slice()));
    MapBuilder::new()
        .insert(1, cbor::int(2))
        .insert(3, cbor::int(COSE_ALG_ECDH_ES_HKDF_256))
        .insert(-1, cbor::int(1))
        .insert(-2, coordinate(point.x()))
        .insert(-3, coordinate(point.y()))
        .build()
}

/// P-256 public key from a COSE_Key map
pub fn parse_cose_key(value: &Value) -> Result<PublicKey> {
    let map = MapReader::new(value.clone())?;
    let x = cbor::as_bytes(map.require(-2)?)?;
    let y = cbor::as_bytes(map.require(-3)?)?;
    if x.len() != 32 || y.len() != 32 {
        return Err(Fido2Error::crypto("COSE key coordinates are not 32 bytes"));
    }
    let point = EncodedPoint::from_affine_coordinates(
        p256::FieldBytes::from_slice(x),
        p256::FieldBytes::from_slice(y),
        false,
    );
    Option::from(PublicKey::from_encoded_point(&point))
        .ok_or_else(|| Fido2Error::crypto("COSE key is not a point on P-256"))
}

/// Shared secret `SHA-256(ECDH x coordinate)`
pub fn shared_secret(secret: &EphemeralSecret, peer: &PublicKey) -> Zeroizing<[u8; 32]> {
    let shared = secret.diffie_hellman(peer);
    Zeroizing::new(Sha256::digest(shared.raw_secret_bytes()).into())
}

/// Result of a key agreement with the authenticator
pub struct KeyAgreement {
    /// Platform public key to send as `keyAgreement`
    pub platform_key: Value,
    shared_secret: Zeroizing<[u8; 32]>,
}

impl std::fmt::Debug for KeyAgreement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyAgreement").finish_non_exhaustive()
    }
}

impl KeyAgreement {
    /// Agree on a secret with the authenticator's COSE key
    pub fn new(authenticator_key: &Value) -> Result<Self> {
        let peer = parse_cose_key(authenticator_key)?;
        let secret = EphemeralSecret::random(&mut OsRng);
        Ok(Self {
            platform_key: cose_key(&secret.public_key()),
            shared_secret: shared_secret(&secret, &peer),
        })
    }

    /// Agreed secret
    pub fn secret(&self) -> &[u8; 32] {
        &self.shared_secret
    }

    /// `pinHashEnc` for `pin`
    pub fn pin_hash_enc(&self, pin: &str) -> Result<Vec<u8>> {
        encrypt(&self.shared_secret, &pin_hash(pin))
    }

    /// `newPinEnc` for `pin`
    pub fn new_pin_enc(&self, pin: &str) -> Result<Vec<u8>> {
        encrypt(&self.shared_secret, &pad_pin(pin)?)
    }

    /// `pinAuth` over `message` with the shared secret
    pub fn authenticate(&self, message: &[u8]) -> Result<[u8; 16]> {
        authenticate(self.shared_secret.as_slice(), message)
    }

    /// Decrypt the PIN token returned by getPinToken
    pub fn decrypt_token(&self, encrypted: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        decrypt(&self.shared_secret, encrypted).map(Zeroizing::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_round_trip() {
        let key = [0x42; 32];
        let padded = pad_pin("1234").unwrap();
        let encrypted = encrypt(&key, &padded).unwrap();
        assert_eq!(encrypted.len(), 64);
        assert_ne!(encrypted.as_slice(), padded.as_slice());
        assert_eq!(decrypt(&key, &encrypted).unwrap(), padded.to_vec());
        assert!(encrypt(&key, &[0; 15]).is_err());
    }

    #[test]
    fn test_pin_rules() {
        assert!(validate_pin("123").is_err());
        assert!(validate_pin("1234").is_ok());
        assert!(validate_pin(&"9".repeat(63)).is_ok());
        assert!(matches!(validate_pin(&"9".repeat(64)), Err(Fido2Error::InvalidPin(_))));
    }

    #[test]
    fn test_both_sides_agree() {
        let authenticator = EphemeralSecret::random(&mut OsRng);
        let agreement = KeyAgreement::new(&cose_key(&authenticator.public_key())).unwrap();
        let platform = parse_cose_key(&agreement.platform_key).unwrap();
        assert_eq!(*shared_secret(&authenticator, &platform), *agreement.secret());

        let encrypted = agreement.pin_hash_enc("1234").unwrap();
        assert_eq!(decrypt(agreement.secret(), &encrypted).unwrap(), pin_hash("1234"));
    }

    #[test]
    fn test_authenticate_is_truncated_hmac() {
        // RFC 4231 test case 2
        let mac = authenticate(b"Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(hex::encode(mac), "5bdcc146bf60754e6a042426089575c7");
    }

    #[test]
    fn test_rejects_foreign_point() {
        let key = MapBuilder::new()
            .insert(-2, cbor::bytes(&[1; 32]))
            .insert(-3, cbor::bytes(&[2; 32]))
            .build();
        assert!(matches!(parse_cose_key(&key), Err(Fido2Error::Crypto(_))));
    }
}
