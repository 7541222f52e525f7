//! CTAP2 request and response types

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::cbor::{self, MapBuilder, MapReader, Value};
use crate::error::{Fido2Error, Result};

/// COSE algorithm identifier for ES256
pub const ALG_ES256: i64 = -7;

/// COSE algorithm identifier for EdDSA
pub const ALG_EDDSA: i64 = -8;

const PUBLIC_KEY: &str = "public-key";

/// authenticatorGetInfo response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthenticatorInfo {
    /// Supported protocol versions, e.g. `FIDO_2_0`
    pub versions: Vec<String>,
    /// Supported extensions
    pub extensions: Vec<String>,
    /// Authenticator model identifier
    pub aaguid: Vec<u8>,
    /// Option flags such as `rk`, `up`, `clientPin`
    pub options: BTreeMap<String, bool>,
    /// Largest message the authenticator accepts
    pub max_msg_size: Option<u64>,
    /// Supported PIN protocol versions
    pub pin_protocols: Vec<u64>,
}

impl AuthenticatorInfo {
    /// Parse the response map
    pub fn from_map(map: &MapReader) -> Result<Self> {
        let mut options = BTreeMap::new();
        if let Some(value) = map.get(4) {
            let Value::Map(entries) = value else {
                return Err(Fido2Error::cbor("options is not a map"));
            };
            for (key, value) in entries {
                options.insert(cbor::as_text(key)?.to_owned(), cbor::as_bool(value)?);
            }
        }
        Ok(Self {
            versions: cbor::as_text_array(map.require(1)?)?,
            extensions: map.get(2).map(cbor::as_text_array).transpose()?.unwrap_or_default(),
            aaguid: cbor::as_bytes(map.require(3)?)?.to_vec(),
            options,
            max_msg_size: map.get(5).map(cbor::as_u64).transpose()?,
            pin_protocols: map
                .get(6)
                .map(|v| cbor::as_array(v)?.iter().map(cbor::as_u64).collect())
                .transpose()?
                .unwrap_or_default(),
        })
    }

    /// Value of an option flag, if the authenticator reports it
    pub fn option(&self, name: &str) -> Option<bool> {
        self.options.get(name).copied()
    }

    /// Whether a PIN is set; `None` when PINs are not supported
    pub fn client_pin(&self) -> Option<bool> {
        self.option("clientPin")
    }
}

/// Relying party of a credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelyingParty {
    /// RP id, usually a domain
    pub id: String,
    /// Display name
    pub name: Option<String>,
}

impl RelyingParty {
    fn to_value(&self) -> Value {
        let mut entries = vec![("id", cbor::text(&self.id))];
        if let Some(name) = &self.name {
            entries.push(("name", cbor::text(name)));
        }
        cbor::text_map(entries)
    }
}

/// User account of a credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Opaque user handle
    pub id: Vec<u8>,
    /// Account name
    pub name: Option<String>,
    /// Display name
    pub display_name: Option<String>,
}

impl User {
    fn to_value(&self) -> Value {
        let mut entries = vec![("id", cbor::bytes(&self.id))];
        if let Some(name) = &self.name {
            entries.push(("name", cbor::text(name)));
        }
        if let Some(display_name) = &self.display_name {
            entries.push(("displayName", cbor::text(display_name)));
        }
        cbor::text_map(entries)
    }

    fn from_value(value: &Value) -> Result<Self> {
        let map = MapReader::new(value.clone())?;
        let text = |key: &str| {
            let value = map.get_text(key).map(cbor::as_text).transpose()?;
            Ok::<_, Fido2Error>(value.map(str::to_owned))
        };
        let id = map.get_text("id").ok_or_else(|| Fido2Error::cbor("user without id"))?;
        Ok(Self {
            id: cbor::as_bytes(id)?.to_vec(),
            name: text("name")?,
            display_name: text("displayName")?,
        })
    }
}

/// Public key credential reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialDescriptor {
    /// Credential id
    pub id: Vec<u8>,
}

impl CredentialDescriptor {
    fn to_value(&self) -> Value {
        cbor::text_map([("id", cbor::bytes(&self.id)), ("type", cbor::text(PUBLIC_KEY))])
    }

    fn from_value(value: &Value) -> Result<Self> {
        let map = MapReader::new(value.clone())?;
        let id = map
            .get_text("id")
            .ok_or_else(|| Fido2Error::cbor("credential without id"))?;
        Ok(Self {
            id: cbor::as_bytes(id)?.to_vec(),
        })
    }
}

fn descriptor_list(list: &[CredentialDescriptor]) -> Option<Value> {
    (!list.is_empty())
        .then(|| Value::Array(list.iter().map(CredentialDescriptor::to_value).collect()))
}

fn options(entries: &[(&'static str, bool)]) -> Option<Value> {
    (!entries.is_empty())
        .then(|| cbor::text_map(entries.iter().map(|(k, v)| (*k, Value::Bool(*v)))))
}

/// Authenticator data under key 2 of a make/get response
fn auth_data(map: &MapReader) -> Result<AuthenticatorData> {
    AuthenticatorData::parse(Bytes::copy_from_slice(cbor::as_bytes(map.require(2)?)?))
}

/// authenticatorMakeCredential parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MakeCredentialRequest {
    /// SHA-256 of the client data
    pub client_data_hash: Vec<u8>,
    /// Relying party
    pub rp: RelyingParty,
    /// User account
    pub user: User,
    /// Acceptable COSE algorithms, most preferred first
    pub algorithms: Vec<i64>,
    /// Credentials that must not already exist on the key
    pub exclude_list: Vec<CredentialDescriptor>,
    /// Store the credential on the key
    pub resident_key: bool,
    /// Ask the authenticator for user verification
    pub user_verification: bool,
    /// Fail with [`Fido2Error::PinTokenRequired`] unless a PIN was verified
    pub require_pin: bool,
}

impl MakeCredentialRequest {
    /// ES256 request with no options
    pub fn new(client_data_hash: impl Into<Vec<u8>>, rp: RelyingParty, user: User) -> Self {
        Self {
            client_data_hash: client_data_hash.into(),
            rp,
            user,
            algorithms: vec![ALG_ES256],
            exclude_list: Vec::new(),
            resident_key: false,
            user_verification: false,
            require_pin: false,
        }
    }

    pub(crate) fn to_value(&self, pin_auth: Option<[u8; 16]>) -> Value {
        let algorithms = self
            .algorithms
            .iter()
            .map(|alg| cbor::text_map([("alg", cbor::int(*alg)), ("type", cbor::text(PUBLIC_KEY))]))
            .collect();
        let mut flags = Vec::new();
        if self.resident_key {
            flags.push(("rk", true));
        }
        if self.user_verification && pin_auth.is_none() {
            flags.push(("uv", true));
        }
        MapBuilder::new()
            .insert(1, cbor::bytes(&self.client_data_hash))
            .insert(2, self.rp.to_value())
            .insert(3, self.user.to_value())
            .insert(4, Value::Array(algorithms))
            .insert_opt(5, descriptor_list(&self.exclude_list))
            .insert_opt(7, options(&flags))
            .insert_opt(8, pin_auth.map(|auth| cbor::bytes(&auth)))
            .insert_opt(9, pin_auth.map(|_| cbor::int(crate::pin::PIN_PROTOCOL)))
            .build()
    }
}

/// Credential data attested in a make-credential response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestedCredential {
    /// Authenticator model identifier
    pub aaguid: [u8; 16],
    /// New credential id
    pub credential_id: Bytes,
    /// COSE public key followed by any extension data
    pub public_key: Bytes,
}

/// Parsed authenticator data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatorData {
    /// Raw bytes, as signed by the authenticator
    pub raw: Bytes,
    /// SHA-256 of the RP id
    pub rp_id_hash: [u8; 32],
    /// Flag byte
    pub flags: u8,
    /// Signature counter
    pub sign_count: u32,
    /// Attested credential, present when the `AT` flag is set
    pub attested_credential: Option<AttestedCredential>,
}

impl AuthenticatorData {
    /// User present flag
    pub const FLAG_UP: u8 = 0x01;
    /// User verified flag
    pub const FLAG_UV: u8 = 0x04;
    /// Attested credential data included
    pub const FLAG_AT: u8 = 0x40;
    /// Extension data included
    pub const FLAG_ED: u8 = 0x80;

    /// Parse authenticator data
    pub fn parse(raw: Bytes) -> Result<Self> {
        if raw.len() < 37 {
            return Err(Fido2Error::cbor("authenticator data shorter than 37 bytes"));
        }
        let mut rp_id_hash = [0u8; 32];
        rp_id_hash.copy_from_slice(&raw[..32]);
        let flags = raw[32];
        let sign_count = u32::from_be_bytes([raw[33], raw[34], raw[35], raw[36]]);

        let attested_credential = if flags & Self::FLAG_AT != 0 {
            let rest = raw.slice(37..);
            if rest.len() < 18 {
                return Err(Fido2Error::cbor("attested credential data truncated"));
            }
            let mut aaguid = [0u8; 16];
            aaguid.copy_from_slice(&rest[..16]);
            let id_len = usize::from(u16::from_be_bytes([rest[16], rest[17]]));
            if rest.len() < 18 + id_len {
                return Err(Fido2Error::cbor("credential id truncated"));
            }
            Some(AttestedCredential {
                aaguid,
                credential_id: rest.slice(18..18 + id_len),
                public_key: rest.slice(18 + id_len..),
            })
        } else {
            None
        };

        Ok(Self {
            raw,
            rp_id_hash,
            flags,
            sign_count,
            attested_credential,
        })
    }

    /// Whether the user was present
    pub const fn user_present(&self) -> bool {
        self.flags & Self::FLAG_UP != 0
    }

    /// Whether the user was verified
    pub const fn user_verified(&self) -> bool {
        self.flags & Self::FLAG_UV != 0
    }
}

/// authenticatorMakeCredential response
#[derive(Debug, Clone, PartialEq)]
pub struct MakeCredentialResponse {
    /// Attestation statement format
    pub fmt: String,
    /// Authenticator data
    pub auth_data: AuthenticatorData,
    /// Attestation statement, left as CBOR
    pub att_stmt: Value,
}

impl MakeCredentialResponse {
    /// Parse the response map
    pub fn from_map(map: &MapReader) -> Result<Self> {
        Ok(Self {
            fmt: cbor::as_text(map.require(1)?)?.to_owned(),
            auth_data: auth_data(map)?,
            att_stmt: map.require(3)?.clone(),
        })
    }
}

/// authenticatorGetAssertion parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetAssertionRequest {
    /// Relying party id
    pub rp_id: String,
    /// SHA-256 of the client data
    pub client_data_hash: Vec<u8>,
    /// Acceptable credentials; empty for discoverable credentials
    pub allow_list: Vec<CredentialDescriptor>,
    /// Require user presence
    pub user_presence: bool,
    /// Ask the authenticator for user verification
    pub user_verification: bool,
    /// Fail with [`Fido2Error::PinTokenRequired`] unless a PIN was verified
    pub require_pin: bool,
}

impl GetAssertionRequest {
    /// Request requiring user presence
    pub fn new(rp_id: impl Into<String>, client_data_hash: impl Into<Vec<u8>>) -> Self {
        Self {
            rp_id: rp_id.into(),
            client_data_hash: client_data_hash.into(),
            allow_list: Vec::new(),
            user_presence: true,
            user_verification: false,
            require_pin: false,
        }
    }

    pub(crate) fn to_value(&self, pin_auth: Option<[u8; 16]>) -> Value {
        let mut flags = Vec::new();
        if !self.user_presence {
            flags.push(("up", false));
        }
        if self.user_verification && pin_auth.is_none() {
            flags.push(("uv", true));
        }
        MapBuilder::new()
            .insert(1, cbor::text(&self.rp_id))
            .insert(2, cbor::bytes(&self.client_data_hash))
            .insert_opt(3, descriptor_list(&self.allow_list))
            .insert_opt(5, options(&flags))
            .insert_opt(6, pin_auth.map(|auth| cbor::bytes(&auth)))
            .insert_opt(7, pin_auth.map(|_| cbor::int(crate::pin::PIN_PROTOCOL)))
            .build()
    }
}

/// authenticatorGetAssertion / authenticatorGetNextAssertion response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetAssertionResponse {
    /// Credential that signed, when the request did not pin it down
    pub credential: Option<CredentialDescriptor>,
    /// Authenticator data
    pub auth_data: AuthenticatorData,
    /// Assertion signature
    pub signature: Vec<u8>,
    /// User account, for discoverable credentials
    pub user: Option<User>,
    /// Number of assertions available through get-next-assertion
    pub number_of_credentials: Option<u64>,
}

impl GetAssertionResponse {
    /// Parse the response map
    pub fn from_map(map: &MapReader) -> Result<Self> {
        Ok(Self {
            credential: map.get(1).map(CredentialDescriptor::from_value).transpose()?,
            auth_data: auth_data(map)?,
            signature: cbor::as_bytes(map.require(3)?)?.to_vec(),
            user: map.get(4).map(User::from_value).transpose()?,
            number_of_credentials: map.get(5).map(cbor::as_u64).transpose()?,
        })
    }
}
