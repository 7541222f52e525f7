//! Simulated CTAP2 authenticator behind a mock transport

#![allow(dead_code, unreachable_pub, missing_debug_implementations)]

use std::sync::Arc;

use p256::ecdh::EphemeralSecret;
use parking_lot::Mutex;
use rand_v8::rngs::OsRng;
use sha2::{Digest, Sha256};
use ykit_apdu_core::transport::mock::{CommandLog, MockTransport};
use ykit_apdu_core::{Application, Bytes};
use ykit_connection::{ConnectionConfig, SmartCardInterface};
use ykit_fido2::cbor::{self, MapBuilder, MapReader, Value};
use ykit_fido2::commands::{KEEP_ALIVE_PROCESSING, KEEP_ALIVE_UP_NEEDED};
use ykit_fido2::pin;

/// Largest response chunk before the authenticator answers `61XX`
const CHUNK: usize = 64;
pub const AAGUID: [u8; 16] = [0xEE; 16];
pub const MAX_RETRIES: u64 = 8;

#[derive(Debug, Clone)]
pub struct StoredCredential {
    pub rp_id: String,
    pub id: Vec<u8>,
    pub user_id: Vec<u8>,
}

pub struct Authenticator {
    key_agreement: EphemeralSecret,
    pub pin_hash: Option<[u8; 16]>,
    pub retries: u64,
    pub pin_token: [u8; 32],
    /// Keep-alive polls answered with `91 00` before a touch operation completes
    pub touches: usize,
    /// Keep-alive status byte sent with each poll answer
    pub poll_status: u8,
    pub credentials: Vec<StoredCredential>,
    pub sign_count: u32,
    /// Whether the last make/get request carried a valid pinAuth
    pub last_pin_auth: bool,
    polls_left: usize,
    pending: Option<Vec<u8>>,
    assertions: Vec<Vec<u8>>,
    chained: Vec<u8>,
    remaining: Vec<u8>,
}

fn ok(value: Value) -> Vec<u8> {
    let mut out = vec![0x00];
    out.extend_from_slice(&cbor::encode(&value).unwrap());
    out
}

fn text_of(map: &MapReader, key: &str) -> Option<String> {
    map.get_text(key).map(|v| cbor::as_text(v).unwrap().to_owned())
}

impl Authenticator {
    pub fn new() -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self {
            key_agreement: EphemeralSecret::random(&mut OsRng),
            pin_hash: None,
            retries: MAX_RETRIES,
            pin_token: [0x7D; 32],
            touches: 0,
            poll_status: KEEP_ALIVE_UP_NEEDED,
            credentials: Vec::new(),
            sign_count: 0,
            last_pin_auth: false,
            polls_left: 0,
            pending: None,
            assertions: Vec::new(),
            chained: Vec::new(),
            remaining: Vec::new(),
        }))
    }

    pub fn set_pin(&mut self, pin: &str) {
        self.pin_hash = Some(pin::pin_hash(pin));
    }

    fn respond(&mut self, mut data: Vec<u8>) -> Bytes {
        if data.len() > CHUNK {
            self.remaining = data.split_off(CHUNK);
            let announced = self.remaining.len().min(0xFF) as u8;
            data.extend_from_slice(&[0x61, announced]);
        } else {
            data.extend_from_slice(&[0x90, 0x00]);
        }
        Bytes::from(data)
    }

    fn status(sw: u16) -> Bytes {
        Bytes::copy_from_slice(&sw.to_be_bytes())
    }

    fn keep_alive(status: u8) -> Bytes {
        Bytes::from(vec![status, 0x91, 0x00])
    }

    fn handle(&mut self, apdu: &[u8]) -> Bytes {
        let (cla, ins, p1) = (apdu[0], apdu[1], apdu[2]);
        let data = if apdu.len() > 5 { &apdu[5..5 + usize::from(apdu[4])] } else { &[][..] };
        if ins != 0xC0 {
            self.remaining.clear();
        }

        match (ins, p1) {
            (0xA4, 0x04) if data == Application::Fido2.aid() => self.respond(b"FIDO_2_0".to_vec()),
            (0xA4, 0x04) => Self::status(0x6A82),
            (0xC0, _) => {
                let rest = std::mem::take(&mut self.remaining);
                self.respond(rest)
            }
            (0x10, _) if cla & 0x10 != 0 => {
                self.chained.extend_from_slice(data);
                Self::status(0x9000)
            }
            (0x10, _) => {
                let mut body = std::mem::take(&mut self.chained);
                body.extend_from_slice(data);
                self.message(&body)
            }
            (0x11, _) => match self.polls_left {
                0 => Self::status(0x6985),
                1 => {
                    self.polls_left = 0;
                    let response = self.pending.take().unwrap_or_default();
                    self.respond(response)
                }
                _ => {
                    self.polls_left -= 1;
                    Self::keep_alive(self.poll_status)
                }
            },
            _ => Self::status(0x6D00),
        }
    }

    fn message(&mut self, body: &[u8]) -> Bytes {
        let (&command, parameters) = body.split_first().unwrap();
        let parameters = (!parameters.is_empty()).then(|| MapReader::decode(parameters).unwrap());
        let response = match command {
            0x01 => self.make_credential(&parameters.unwrap()),
            0x02 => self.get_assertion(&parameters.unwrap()),
            0x04 => self.get_info(),
            0x06 => self.client_pin(&parameters.unwrap()),
            0x07 => {
                self.credentials.clear();
                self.pin_hash = None;
                self.retries = MAX_RETRIES;
                vec![0x00]
            }
            0x08 => match self.assertions.pop() {
                Some(assertion) => assertion,
                None => vec![0x30],
            },
            _ => vec![0x01],
        };
        if matches!(command, 0x01 | 0x02 | 0x07) && self.touches > 0 {
            self.pending = Some(response);
            self.polls_left = self.touches;
            return Self::keep_alive(KEEP_ALIVE_PROCESSING);
        }
        self.respond(response)
    }

    fn get_info(&self) -> Vec<u8> {
        let options = cbor::text_map([
            ("rk", Value::Bool(true)),
            ("up", Value::Bool(true)),
            ("clientPin", Value::Bool(self.pin_hash.is_some())),
        ]);
        ok(MapBuilder::new()
            .insert(1, Value::Array(vec![cbor::text("FIDO_2_0"), cbor::text("U2F_V2")]))
            .insert(2, Value::Array(vec![cbor::text("hmac-secret")]))
            .insert(3, cbor::bytes(&AAGUID))
            .insert(4, options)
            .insert(5, cbor::int(1200))
            .insert(6, Value::Array(vec![cbor::int(1)]))
            .build())
    }

    fn shared_secret(&self, parameters: &MapReader) -> [u8; 32] {
        let platform = pin::parse_cose_key(parameters.require(3).unwrap()).unwrap();
        *pin::shared_secret(&self.key_agreement, &platform)
    }

    fn check_pin_hash(&mut self, secret: &[u8; 32], pin_hash_enc: &[u8]) -> Result<(), u8> {
        if self.retries == 0 {
            return Err(0x32);
        }
        let pin_hash = pin::decrypt(secret, pin_hash_enc).unwrap();
        if Some(pin_hash.as_slice()) != self.pin_hash.as_ref().map(|h| &h[..]) {
            self.retries -= 1;
            return Err(if self.retries == 0 { 0x32 } else { 0x31 });
        }
        self.retries = MAX_RETRIES;
        Ok(())
    }

    fn decrypt_new_pin(secret: &[u8; 32], new_pin_enc: &[u8]) -> String {
        let padded = pin::decrypt(secret, new_pin_enc).unwrap();
        let end = padded.iter().position(|&b| b == 0).unwrap_or(padded.len());
        String::from_utf8(padded[..end].to_vec()).unwrap()
    }

    fn client_pin(&mut self, parameters: &MapReader) -> Vec<u8> {
        let bytes = |key| cbor::as_bytes(parameters.require(key).unwrap()).unwrap().to_vec();
        match cbor::as_u64(parameters.require(2).unwrap()).unwrap() {
            0x01 => ok(MapBuilder::new().insert(3, cbor::int(self.retries as i64)).build()),
            0x02 => ok(MapBuilder::new()
                .insert(1, pin::cose_key(&self.key_agreement.public_key()))
                .build()),
            0x03 => {
                if self.pin_hash.is_some() {
                    return vec![0x30];
                }
                let secret = self.shared_secret(parameters);
                let new_pin_enc = bytes(5);
                if pin::authenticate(&secret, &new_pin_enc).unwrap().to_vec() != bytes(4) {
                    return vec![0x33];
                }
                let pin = Self::decrypt_new_pin(&secret, &new_pin_enc);
                self.set_pin(&pin);
                vec![0x00]
            }
            0x04 => {
                if self.pin_hash.is_none() {
                    return vec![0x35];
                }
                let secret = self.shared_secret(parameters);
                let (new_pin_enc, pin_hash_enc) = (bytes(5), bytes(6));
                let message = [new_pin_enc.as_slice(), pin_hash_enc.as_slice()].concat();
                if pin::authenticate(&secret, &message).unwrap().to_vec() != bytes(4) {
                    return vec![0x33];
                }
                if let Err(status) = self.check_pin_hash(&secret, &pin_hash_enc) {
                    return vec![status];
                }
                let pin = Self::decrypt_new_pin(&secret, &new_pin_enc);
                self.set_pin(&pin);
                vec![0x00]
            }
            0x05 => {
                if self.pin_hash.is_none() {
                    return vec![0x35];
                }
                let secret = self.shared_secret(parameters);
                if let Err(status) = self.check_pin_hash(&secret, &bytes(6)) {
                    return vec![status];
                }
                let token = pin::encrypt(&secret, &self.pin_token).unwrap();
                ok(MapBuilder::new().insert(2, cbor::bytes(&token)).build())
            }
            _ => vec![0x02],
        }
    }

    /// Status for the pinAuth in `parameters` under `key`, if any
    fn check_pin_auth(
        &mut self,
        parameters: &MapReader,
        key: i64,
        client_data_hash: &[u8],
    ) -> Result<bool, u8> {
        let Some(pin_auth) = parameters.get(key) else {
            self.last_pin_auth = false;
            return Ok(false);
        };
        let expected = pin::authenticate(&self.pin_token, client_data_hash).unwrap();
        if cbor::as_bytes(pin_auth).unwrap() != expected.as_slice() {
            return Err(0x33);
        }
        self.last_pin_auth = true;
        Ok(true)
    }

    fn auth_data(&self, rp_id: &str, verified: bool, attested: Option<&[u8]>) -> Vec<u8> {
        let mut flags = 0x01;
        if verified {
            flags |= 0x04;
        }
        if attested.is_some() {
            flags |= 0x40;
        }
        let mut data = Sha256::digest(rp_id.as_bytes()).to_vec();
        data.push(flags);
        data.extend_from_slice(&self.sign_count.to_be_bytes());
        if let Some(id) = attested {
            data.extend_from_slice(&AAGUID);
            data.extend_from_slice(&(id.len() as u16).to_be_bytes());
            data.extend_from_slice(id);
            let public_key = pin::cose_key(&self.key_agreement.public_key());
            data.extend_from_slice(&cbor::encode(&public_key).unwrap());
        }
        data
    }

    fn make_credential(&mut self, parameters: &MapReader) -> Vec<u8> {
        let client_data_hash = cbor::as_bytes(parameters.require(1).unwrap()).unwrap().to_vec();
        let verified = match self.check_pin_auth(parameters, 8, &client_data_hash) {
            Ok(verified) => verified,
            Err(status) => return vec![status],
        };
        let rp = MapReader::new(parameters.require(2).unwrap().clone()).unwrap();
        let rp_id = text_of(&rp, "id").unwrap();
        let user = MapReader::new(parameters.require(3).unwrap().clone()).unwrap();
        let user_id = cbor::as_bytes(user.get_text("id").unwrap()).unwrap().to_vec();

        if let Some(exclude) = parameters.get(5) {
            for descriptor in cbor::as_array(exclude).unwrap() {
                let descriptor = MapReader::new(descriptor.clone()).unwrap();
                let id = cbor::as_bytes(descriptor.get_text("id").unwrap()).unwrap();
                if self.credentials.iter().any(|c| c.id == id) {
                    return vec![0x19];
                }
            }
        }

        let id = vec![self.credentials.len() as u8 + 1; 16];
        self.credentials.push(StoredCredential {
            rp_id: rp_id.clone(),
            id: id.clone(),
            user_id,
        });
        let auth_data = self.auth_data(&rp_id, verified, Some(&id));
        ok(MapBuilder::new()
            .insert(1, cbor::text("none"))
            .insert(2, cbor::bytes(&auth_data))
            .insert(3, Value::Map(Vec::new()))
            .build())
    }

    fn assertion(
        &self,
        credential: &StoredCredential,
        client_data_hash: &[u8],
        verified: bool,
        count: Option<usize>,
    ) -> Vec<u8> {
        let auth_data = self.auth_data(&credential.rp_id, verified, None);
        let signature = Sha256::digest([auth_data.as_slice(), client_data_hash].concat());
        let descriptor = cbor::text_map([
            ("id", cbor::bytes(&credential.id)),
            ("type", cbor::text("public-key")),
        ]);
        ok(MapBuilder::new()
            .insert(1, descriptor)
            .insert(2, cbor::bytes(&auth_data))
            .insert(3, cbor::bytes(&signature))
            .insert(4, cbor::text_map([("id", cbor::bytes(&credential.user_id))]))
            .insert_opt(5, count.map(|n| cbor::int(n as i64)))
            .build())
    }

    fn get_assertion(&mut self, parameters: &MapReader) -> Vec<u8> {
        let rp_id = cbor::as_text(parameters.require(1).unwrap()).unwrap().to_owned();
        let client_data_hash = cbor::as_bytes(parameters.require(2).unwrap()).unwrap().to_vec();
        let verified = match self.check_pin_auth(parameters, 6, &client_data_hash) {
            Ok(verified) => verified,
            Err(status) => return vec![status],
        };
        let allowed: Option<Vec<Vec<u8>>> = parameters.get(3).map(|list| {
            cbor::as_array(list)
                .unwrap()
                .iter()
                .map(|d| {
                    let d = MapReader::new(d.clone()).unwrap();
                    cbor::as_bytes(d.get_text("id").unwrap()).unwrap().to_vec()
                })
                .collect()
        });
        let matching: Vec<StoredCredential> = self
            .credentials
            .iter()
            .filter(|c| c.rp_id == rp_id)
            .filter(|c| allowed.as_ref().is_none_or(|ids| ids.contains(&c.id)))
            .cloned()
            .collect();
        let Some((first, rest)) = matching.split_first() else {
            return vec![0x2E];
        };

        self.sign_count += 1;
        let count = (matching.len() > 1).then_some(matching.len());
        let queued = rest
            .iter()
            .rev()
            .map(|c| self.assertion(c, &client_data_hash, verified, None))
            .collect();
        self.assertions = queued;
        self.assertion(first, &client_data_hash, verified, count)
    }
}

pub struct Device {
    pub authenticator: Arc<Mutex<Authenticator>>,
    pub log: CommandLog,
    pub card: SmartCardInterface,
}

/// Engine wired to a simulated authenticator
pub fn device(authenticator: Arc<Mutex<Authenticator>>) -> Device {
    let shared = authenticator.clone();
    let transport = MockTransport::with_handler(move |apdu| Ok(shared.lock().handle(apdu)));
    let log = transport.log();
    let card =
        SmartCardInterface::start(Box::new(transport), &ConnectionConfig::new(), "fido2-test")
            .expect("engine starts");
    Device {
        authenticator,
        log,
        card,
    }
}
