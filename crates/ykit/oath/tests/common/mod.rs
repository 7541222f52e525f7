//! Simulated YKOATH applet behind a mock transport

#![allow(dead_code, unreachable_pub)]

use std::sync::Arc;

use parking_lot::Mutex;
use ykit_apdu_core::tlv::{self, Tlv};
use ykit_apdu_core::transport::mock::{CommandLog, MockTransport};
use ykit_apdu_core::{Application, Bytes};
use ykit_connection::{ConnectionConfig, SmartCardInterface};
use ykit_oath::{HashAlgorithm, otp};

/// Largest response chunk before the applet asks for SEND REMAINING
const CHUNK: usize = 48;
const DEVICE_CHALLENGE: [u8; 8] = [0xC0, 0xFF, 0xEE, 0x00, 0x11, 0x22, 0x33, 0x44];
pub const SALT: [u8; 8] = [0x5A, 0x17, 0x5A, 0x17, 0x5A, 0x17, 0x5A, 0x17];

#[derive(Debug, Clone)]
pub struct StoredCredential {
    pub id: String,
    pub kind: u8,
    pub digits: u8,
    pub secret: Vec<u8>,
    pub touch: bool,
    pub counter: u64,
}

impl StoredCredential {
    fn algorithm(&self) -> HashAlgorithm {
        HashAlgorithm::from_code(self.kind).unwrap()
    }

    fn is_hotp(&self) -> bool {
        self.kind & 0xF0 == 0x10
    }
}

#[derive(Debug)]
pub struct Applet {
    pub version: [u8; 3],
    pub access_key: Option<Vec<u8>>,
    pub authenticated: bool,
    pub credentials: Vec<StoredCredential>,
    remaining: Vec<u8>,
}

impl Applet {
    pub fn new(version: [u8; 3]) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self {
            version,
            access_key: None,
            authenticated: true,
            credentials: Vec::new(),
            remaining: Vec::new(),
        }))
    }

    /// Protect the applet with the key derived from `password`
    pub fn set_password(&mut self, password: &str) {
        self.access_key = Some(ykit_oath::derive_access_key(&SALT, password).to_vec());
        self.authenticated = false;
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

    fn handle(&mut self, apdu: &[u8]) -> Bytes {
        let (ins, p1, p2) = (apdu[1], apdu[2], apdu[3]);
        let data = if apdu.len() > 5 { &apdu[5..5 + usize::from(apdu[4])] } else { &[][..] };
        if ins != 0xA5 {
            self.remaining.clear();
        }

        match ins {
            0xA4 if p1 == 0x04 => self.select(data),
            0xA5 => {
                let rest = std::mem::take(&mut self.remaining);
                self.respond(rest)
            }
            0xA3 => self.validate(data),
            0x04 if (p1, p2) == (0xDE, 0xAD) => {
                self.credentials.clear();
                self.access_key = None;
                self.authenticated = true;
                Self::status(0x9000)
            }
            _ if !self.authenticated => Self::status(0x6982),
            0x01 => self.put(data),
            0x02 => {
                let id = tlv::value_for_tag(data, 0x71).unwrap();
                let before = self.credentials.len();
                self.credentials.retain(|c| c.id.as_bytes() != id.as_ref());
                let sw = if self.credentials.len() == before { 0x6984 } else { 0x9000 };
                Self::status(sw)
            }
            0x03 => self.set_code(data),
            0x05 => {
                let names = tlv::decode_sequence(data).unwrap();
                let (from, to) = (names[0].value(), names[1].value());
                match self.credentials.iter_mut().find(|c| c.id.as_bytes() == from.as_ref()) {
                    Some(credential) => {
                        credential.id = String::from_utf8(to.to_vec()).unwrap();
                        Self::status(0x9000)
                    }
                    None => Self::status(0x6984),
                }
            }
            0xA1 => {
                let mut out = Vec::new();
                for credential in &self.credentials {
                    let mut value = vec![credential.kind];
                    value.extend_from_slice(credential.id.as_bytes());
                    out.extend_from_slice(&Tlv::new(0x72, value).unwrap().to_bytes().unwrap());
                }
                self.respond(out)
            }
            0xA2 => self.calculate(data, p2 == 0x01),
            0xA4 => self.calculate_all(data),
            _ => Self::status(0x6D00),
        }
    }

    fn select(&mut self, aid: &[u8]) -> Bytes {
        if aid != Application::Oath.aid() {
            return Self::status(0x6A82);
        }
        let mut out = tlv::encode(0x79, &self.version).unwrap().to_vec();
        out.extend_from_slice(&tlv::encode(0x71, &SALT).unwrap());
        self.authenticated = self.access_key.is_none();
        if self.access_key.is_some() {
            out.extend_from_slice(&tlv::encode(0x74, &DEVICE_CHALLENGE).unwrap());
            out.extend_from_slice(&tlv::encode(0x7B, &[0x01]).unwrap());
        }
        self.respond(out)
    }

    fn validate(&mut self, data: &[u8]) -> Bytes {
        let Some(key) = self.access_key.clone() else {
            return Self::status(0x6984);
        };
        let response = tlv::value_for_tag(data, 0x75).unwrap();
        let host_challenge = tlv::value_for_tag(data, 0x74).unwrap();
        let expected = otp::hmac(HashAlgorithm::Sha1, &key, &DEVICE_CHALLENGE).unwrap();
        if response.as_ref() != expected.as_slice() {
            return Self::status(0x6A80);
        }
        self.authenticated = true;
        let answer = otp::hmac(HashAlgorithm::Sha1, &key, &host_challenge).unwrap();
        let out = tlv::encode(0x75, &answer).unwrap().to_vec();
        self.respond(out)
    }

    fn put(&mut self, data: &[u8]) -> Bytes {
        // PROPERTY is written as a bare tag and value
        let mut rest = Bytes::copy_from_slice(data);
        let mut records = Vec::new();
        let mut touch = false;
        while !rest.is_empty() {
            if rest[0] == 0x78 {
                touch = rest[1] == 0x02;
                rest = rest.slice(2..);
                continue;
            }
            let (record, tail) = Tlv::parse(rest).unwrap();
            records.push(record);
            rest = tail;
        }
        let id = String::from_utf8(records[0].value().to_vec()).unwrap();
        let key = records[1].value();
        let counter = records
            .iter()
            .find(|r| r.tag() == 0x7A)
            .map_or(0, |r| u64::from(u32::from_be_bytes(r.value()[..4].try_into().unwrap())));
        let credential = StoredCredential {
            id: id.clone(),
            kind: key[0],
            digits: key[1],
            secret: key[2..].to_vec(),
            touch,
            counter,
        };
        self.credentials.retain(|c| c.id != id);
        self.credentials.push(credential);
        Self::status(0x9000)
    }

    fn set_code(&mut self, data: &[u8]) -> Bytes {
        let key = tlv::value_for_tag(data, 0x73).unwrap();
        if key.is_empty() {
            self.access_key = None;
            return Self::status(0x9000);
        }
        let challenge = tlv::value_for_tag(data, 0x74).unwrap();
        let response = tlv::value_for_tag(data, 0x75).unwrap();
        let secret = key[1..].to_vec();
        if otp::hmac(HashAlgorithm::Sha1, &secret, &challenge).unwrap() != response.as_ref() {
            return Self::status(0x6A80);
        }
        self.access_key = Some(secret);
        Self::status(0x9000)
    }

    fn code_record(credential: &mut StoredCredential, challenge: &[u8], truncated: bool) -> Tlv {
        let message = if credential.is_hotp() {
            let counter = credential.counter;
            credential.counter += 1;
            counter.to_be_bytes().to_vec()
        } else {
            challenge.to_vec()
        };
        let hmac = otp::hmac(credential.algorithm(), &credential.secret, &message).unwrap();
        let mut value = vec![credential.digits];
        if truncated {
            value.extend_from_slice(&otp::truncate(&hmac).unwrap().to_be_bytes());
            Tlv::new(0x76, value).unwrap()
        } else {
            value.extend_from_slice(&hmac);
            Tlv::new(0x75, value).unwrap()
        }
    }

    fn calculate(&mut self, data: &[u8], truncated: bool) -> Bytes {
        let id = tlv::value_for_tag(data, 0x71).unwrap();
        let challenge = tlv::value_for_tag(data, 0x74).unwrap();
        let found = self.credentials.iter_mut().find(|c| c.id.as_bytes() == id.as_ref());
        let Some(credential) = found else {
            return Self::status(0x6984);
        };
        let record = Self::code_record(credential, &challenge, truncated);
        self.respond(record.to_bytes().unwrap().to_vec())
    }

    fn calculate_all(&mut self, data: &[u8]) -> Bytes {
        let challenge = tlv::value_for_tag(data, 0x74).unwrap();
        let mut out = Vec::new();
        for credential in &mut self.credentials {
            out.extend_from_slice(&tlv::encode(0x71, credential.id.as_bytes()).unwrap());
            let record = if credential.touch {
                Tlv::new(0x7C, vec![credential.digits]).unwrap()
            } else if credential.is_hotp() {
                Tlv::new(0x77, vec![credential.digits]).unwrap()
            } else {
                Self::code_record(credential, &challenge, true)
            };
            out.extend_from_slice(&record.to_bytes().unwrap());
        }
        self.respond(out)
    }
}

pub struct Device {
    pub applet: Arc<Mutex<Applet>>,
    pub log: CommandLog,
    pub card: SmartCardInterface,
}

/// Engine wired to a simulated applet
pub fn device(applet: Arc<Mutex<Applet>>) -> Device {
    let shared = applet.clone();
    let transport = MockTransport::with_handler(move |apdu| Ok(shared.lock().handle(apdu)));
    let log = transport.log();
    let card = SmartCardInterface::start(Box::new(transport), &ConnectionConfig::new(), "oath-test")
        .expect("engine starts");
    Device { applet, log, card }
}
