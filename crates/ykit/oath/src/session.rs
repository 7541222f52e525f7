//! OATH session over a [`SmartCardInterface`]

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use sha1::Sha1;
use subtle::ConstantTimeEq;
use tracing::{debug, instrument, warn};
use ykit_apdu_core::tlv::{self, Tlv};
use ykit_apdu_core::{ApduCommand, Application, SendRemaining};
use ykit_connection::{
    CardChannel, CommandOptions, Connection, Pending, Session, SessionBinding, SmartCardInterface,
};
use zeroize::Zeroizing;

use crate::commands::{Calculate, CalculateAll, Delete, List, Put, Rename, Reset, SetCode, Validate};
use crate::constants::{
    ACCESS_KEY_LEN, CHALLENGE_LEN, DEFAULT_PERIOD, MAX_CODE_DIGITS, MAX_ID_LEN, PBKDF2_ITERATIONS,
    tags,
};
use crate::credential::{
    Code, Credential, CredentialTemplate, CredentialWithCode, HashAlgorithm, OathType, format_id,
};
use crate::error::{OathError, Result};
use crate::otp;
use crate::version::Version;

/// Applet state announced by SELECT
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectInfo {
    /// Applet version
    pub version: Version,
    /// Salt for deriving the access key; also identifies the applet instance
    pub salt: Bytes,
    /// Challenge to answer before the applet accepts commands
    pub challenge: Option<Bytes>,
    /// Hash algorithm of the access key
    pub algorithm: HashAlgorithm,
}

impl SelectInfo {
    /// Parse a SELECT response payload
    pub fn parse(response: &[u8]) -> Result<Self> {
        let mut version = None;
        let mut salt = None;
        let mut challenge = None;
        let mut algorithm = HashAlgorithm::Sha1;
        for record in tlv::decode_sequence(response)? {
            match record.tag() {
                tags::VERSION => version = Version::from_bytes(record.value()),
                tags::NAME => salt = Some(record.into_value()),
                tags::CHALLENGE => challenge = Some(record.into_value()),
                tags::ALGORITHM => {
                    let code = record.value().first().copied().unwrap_or_default();
                    algorithm = HashAlgorithm::from_code(code).ok_or_else(|| {
                        OathError::protocol(format!("unknown algorithm {code:#04x}"))
                    })?;
                }
                _ => {}
            }
        }
        Ok(Self {
            version: version.ok_or_else(|| OathError::protocol("SELECT response has no version"))?,
            salt: salt.ok_or_else(|| OathError::protocol("SELECT response has no salt"))?,
            challenge,
            algorithm,
        })
    }
}

#[derive(Debug)]
struct State {
    info: SelectInfo,
    locked: bool,
}

impl State {
    fn new(info: SelectInfo) -> Self {
        let locked = info.challenge.is_some();
        Self { info, locked }
    }
}

#[derive(Debug)]
struct Inner {
    card: SmartCardInterface,
    binding: SessionBinding,
    state: Mutex<State>,
}

/// Session with the OATH applet
///
/// Cheap to clone; clones share the lock state. Every operation is queued on
/// the connection and returns immediately.
#[derive(Debug, Clone)]
pub struct OathSession {
    inner: Arc<Inner>,
}

fn options() -> CommandOptions {
    CommandOptions::new().with_send_remaining(SendRemaining::Oath)
}

fn send(channel: &mut CardChannel<'_>, command: &impl ApduCommand) -> Result<Bytes> {
    Ok(channel.transmit_with(&command.to_command(), SendRemaining::Oath)?)
}

/// Access key for `password`: PBKDF2-HMAC-SHA1 over the applet salt
pub fn derive_access_key(salt: &[u8], password: &str) -> Zeroizing<[u8; ACCESS_KEY_LEN]> {
    let mut key = Zeroizing::new([0u8; ACCESS_KEY_LEN]);
    pbkdf2::pbkdf2_hmac::<Sha1>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key[..]);
    key
}

fn time_challenge(credential: &Credential, timestamp: u64) -> Vec<u8> {
    match credential.oath_type {
        OathType::Totp => otp::time_step(timestamp, credential.period).to_be_bytes().to_vec(),
        OathType::Hotp => Vec::new(),
    }
}

fn parse_truncated(value: &[u8]) -> Result<String> {
    match value {
        [digits, a, b, c, d] if (1..=MAX_CODE_DIGITS).contains(digits) => {
            let code = u32::from_be_bytes([*a, *b, *c, *d]) & 0x7FFF_FFFF;
            otp::format_code(code, *digits)
        }
        _ => Err(OathError::protocol("malformed truncated response")),
    }
}

fn calculate_on(
    channel: &mut CardChannel<'_>,
    credential: &Credential,
    timestamp: u64,
) -> Result<Code> {
    let challenge = time_challenge(credential, timestamp);
    let response = send(channel, &Calculate::truncated(&credential.id(), &challenge)?)?;
    let value = tlv::value_for_tag(&response, tags::TRUNCATED_RESPONSE)?;
    Ok(Code::new(parse_truncated(&value)?, credential, timestamp))
}

fn parse_list(response: &[u8]) -> Result<Vec<Credential>> {
    let records = tlv::decode_sequence(response)?;
    tlv::find_all(&records, tags::NAME_LIST)
        .map(|record| {
            let (&kind, id) = record
                .value()
                .split_first()
                .ok_or_else(|| OathError::protocol("empty LIST record"))?;
            let oath_type = OathType::from_code(kind).ok_or_else(|| {
                OathError::protocol(format!("unknown credential type {kind:#04x}"))
            })?;
            let algorithm = HashAlgorithm::from_code(kind)
                .ok_or_else(|| OathError::protocol(format!("unknown algorithm {kind:#04x}")))?;
            Credential::from_id(id, oath_type, algorithm)
        })
        .collect()
}

impl OathSession {
    /// Select the OATH applet on `connection` and open a session
    ///
    /// Always sends a fresh SELECT so the lock challenge is current.
    #[instrument(skip_all)]
    pub fn open(connection: &impl Connection) -> Pending<Self, OathError> {
        let card = match connection.smart_card() {
            Ok(card) => card,
            Err(error) => return Pending::ready(Err(error.into())),
        };
        let session_card = card.clone();
        card.submit(options(), move |channel| {
            let (token, response) = channel.reselect(Application::Oath)?;
            let info = SelectInfo::parse(&response)?;
            debug!(
                version = %info.version,
                locked = info.challenge.is_some(),
                "OATH session opened"
            );
            Ok(Self {
                inner: Arc::new(Inner {
                    card: session_card,
                    binding: SessionBinding::new(token),
                    state: Mutex::new(State::new(info)),
                }),
            })
        })
    }

    /// Applet version
    pub fn version(&self) -> Version {
        self.inner.state.lock().info.version
    }

    /// Applet salt from the last SELECT
    pub fn salt(&self) -> Bytes {
        self.inner.state.lock().info.salt.clone()
    }

    /// Whether the applet still needs [`OathSession::unlock`]
    pub fn is_locked(&self) -> bool {
        self.inner.state.lock().locked
    }

    /// Whether the applet was password protected when selected
    pub fn has_password(&self) -> bool {
        self.inner.state.lock().info.challenge.is_some()
    }

    fn run_unlocked<T, F>(&self, task: F) -> Pending<T, OathError>
    where
        T: Send + 'static,
        F: FnOnce(&mut CardChannel<'_>, &Self) -> Result<T> + Send + 'static,
    {
        let session = self.clone();
        self.run(options(), move |channel| {
            // read at execution time so an unlock queued earlier counts
            if session.is_locked() {
                return Err(OathError::AuthenticationRequired);
            }
            task(channel, &session)
        })
    }

    /// Unlock a password protected applet
    ///
    /// Succeeds without I/O when the applet is not locked.
    #[instrument(skip_all)]
    pub fn unlock(&self, password: &str) -> Pending<(), OathError> {
        let password = Zeroizing::new(password.to_owned());
        let session = self.clone();
        self.run(options(), move |channel| {
            let (salt, challenge, algorithm) = {
                let state = session.inner.state.lock();
                match (&state.info.challenge, state.locked) {
                    (Some(challenge), true) => {
                        (state.info.salt.clone(), challenge.clone(), state.info.algorithm)
                    }
                    _ => return Ok(()),
                }
            };
            let key = derive_access_key(&salt, &password);
            let response = otp::hmac(algorithm, &key[..], &challenge)?;
            let host_challenge: [u8; CHALLENGE_LEN] = rand::random();

            let reply = match send(channel, &Validate::new(&response, &host_challenge)?) {
                Err(OathError::WrongSyntax | OathError::AuthenticationRequired) => {
                    warn!("OATH password rejected");
                    return Err(OathError::WrongPassword);
                }
                other => other?,
            };
            let expected = otp::hmac(algorithm, &key[..], &host_challenge)?;
            let echoed = tlv::value_for_tag(&reply, tags::RESPONSE)?;
            if !bool::from(expected.as_slice().ct_eq(echoed.as_ref())) {
                warn!("OATH applet answered with an unexpected response");
                return Err(OathError::WrongPassword);
            }
            session.inner.state.lock().locked = false;
            debug!("OATH session unlocked");
            Ok(())
        })
    }

    /// Code for `credential` at unix time `timestamp`
    #[instrument(skip(self, credential), fields(credential = %credential))]
    pub fn calculate(&self, credential: Credential, timestamp: u64) -> Pending<Code, OathError> {
        self.run_unlocked(move |channel, _| calculate_on(channel, &credential, timestamp))
    }

    /// Full HMAC of `challenge` under the credential secret
    #[instrument(skip(self, credential, challenge), fields(credential = %credential))]
    pub fn calculate_response(
        &self,
        credential: Credential,
        challenge: Bytes,
    ) -> Pending<Bytes, OathError> {
        self.run_unlocked(move |channel, _| {
            let response = send(channel, &Calculate::full(&credential.id(), &challenge)?)?;
            let value = tlv::value_for_tag(&response, tags::RESPONSE)?;
            // first byte repeats the digit count
            if value.is_empty() {
                return Err(OathError::protocol("empty HMAC response"));
            }
            Ok(value.slice(1..))
        })
    }

    /// Every credential with a code where the applet computes one
    ///
    /// HOTP and touch credentials come back without a code. TOTP credentials
    /// with a non-default period are calculated again with their own step.
    #[instrument(skip(self))]
    pub fn calculate_all(&self, timestamp: u64) -> Pending<Vec<CredentialWithCode>, OathError> {
        self.run_unlocked(move |channel, _| {
            let known: HashMap<String, Credential> = parse_list(&send(channel, &List::new())?)?
                .into_iter()
                .map(|credential| (credential.id(), credential))
                .collect();
            let challenge = otp::time_step(timestamp, DEFAULT_PERIOD).to_be_bytes();
            let response = send(channel, &CalculateAll::new(&challenge)?)?;

            let mut records = tlv::decode_sequence(&response)?.into_iter();
            let mut results = Vec::new();
            while let Some(name) = records.next() {
                if name.tag() != tags::NAME {
                    let tag = name.tag();
                    return Err(OathError::protocol(format!("expected name record, got {tag:#x}")));
                }
                let answer = records
                    .next()
                    .ok_or_else(|| OathError::protocol("name record without a response"))?;
                results.push(Self::entry(channel, &known, &name, &answer, timestamp)?);
            }
            debug!(count = results.len(), "calculated all credentials");
            Ok(results)
        })
    }

    fn entry(
        channel: &mut CardChannel<'_>,
        known: &HashMap<String, Credential>,
        name: &Tlv,
        answer: &Tlv,
        timestamp: u64,
    ) -> Result<CredentialWithCode> {
        let id = std::str::from_utf8(name.value())
            .map_err(|_| OathError::protocol("credential id is not UTF-8"))?;
        let mut credential = match known.get(id) {
            Some(credential) => credential.clone(),
            None => {
                let oath_type = if answer.tag() == tags::NO_RESPONSE {
                    OathType::Hotp
                } else {
                    OathType::Totp
                };
                Credential::from_id(name.value(), oath_type, HashAlgorithm::Sha1)?
            }
        };
        credential.requires_touch = answer.tag() == tags::TOUCH;

        let code = match answer.tag() {
            tags::TRUNCATED_RESPONSE if credential.period != DEFAULT_PERIOD => {
                Some(calculate_on(channel, &credential, timestamp)?)
            }
            tags::TRUNCATED_RESPONSE => {
                Some(Code::new(parse_truncated(answer.value())?, &credential, timestamp))
            }
            tags::NO_RESPONSE | tags::TOUCH => None,
            tag => return Err(OathError::protocol(format!("unexpected response tag {tag:#x}"))),
        };
        Ok(CredentialWithCode { credential, code })
    }

    /// Stored credentials
    #[instrument(skip(self))]
    pub fn list(&self) -> Pending<Vec<Credential>, OathError> {
        self.run_unlocked(|channel, _| parse_list(&send(channel, &List::new())?))
    }

    /// Store `template`, replacing a credential with the same id
    #[instrument(skip_all, fields(account = %template.account))]
    pub fn put(
        &self,
        template: &CredentialTemplate,
        requires_touch: bool,
    ) -> Pending<Credential, OathError> {
        let command = match Put::new(template, requires_touch) {
            Ok(command) => command,
            Err(error) => return Pending::ready(Err(error)),
        };
        let credential = template.credential(requires_touch);
        self.run_unlocked(move |channel, _| {
            send(channel, &command)?;
            debug!(id = %credential.id(), "credential stored");
            Ok(credential)
        })
    }

    /// Remove `credential`
    #[instrument(skip(self, credential), fields(credential = %credential))]
    pub fn delete(&self, credential: Credential) -> Pending<(), OathError> {
        self.run_unlocked(move |channel, _| {
            send(channel, &Delete::new(&credential.id())?)?;
            Ok(())
        })
    }

    /// Give `credential` a new issuer and account
    #[instrument(skip(self, credential), fields(credential = %credential))]
    pub fn rename(
        &self,
        credential: Credential,
        issuer: Option<&str>,
        account: &str,
    ) -> Pending<Credential, OathError> {
        let version = self.version();
        if version < Version::RENAME {
            return Pending::ready(Err(OathError::Unsupported {
                operation: "rename",
                required: Version::RENAME,
                actual: version,
            }));
        }
        let new_id = format_id(credential.oath_type, issuer, account, credential.period);
        if account.is_empty() || new_id.len() > MAX_ID_LEN {
            let error = OathError::invalid(format!("unusable credential id {new_id:?}"));
            return Pending::ready(Err(error));
        }
        let renamed = Credential {
            issuer: issuer.map(str::to_owned),
            account: account.to_owned(),
            ..credential.clone()
        };
        self.run_unlocked(move |channel, _| {
            send(channel, &Rename::new(&credential.id(), &new_id)?)?;
            Ok(renamed)
        })
    }

    /// Set the applet password; an empty password removes it
    #[instrument(skip_all)]
    pub fn set_password(&self, password: &str) -> Pending<(), OathError> {
        let password = Zeroizing::new(password.to_owned());
        self.run_unlocked(move |channel, session| {
            if password.is_empty() {
                send(channel, &SetCode::remove()?)?;
                session.inner.state.lock().info.challenge = None;
                debug!("OATH password removed");
                return Ok(());
            }
            let salt = session.salt();
            let key = derive_access_key(&salt, &password);
            let challenge: [u8; CHALLENGE_LEN] = rand::random();
            let response = otp::hmac(HashAlgorithm::Sha1, &key[..], &challenge)?;
            send(channel, &SetCode::new(HashAlgorithm::Sha1, &key[..], &challenge, &response)?)?;
            let mut state = session.inner.state.lock();
            state.info.challenge = Some(Bytes::copy_from_slice(&challenge));
            state.info.algorithm = HashAlgorithm::Sha1;
            debug!("OATH password set");
            Ok(())
        })
    }

    /// Wipe every credential and the password
    ///
    /// Allowed while locked. The applet is selected again afterwards and the
    /// session continues with the fresh state.
    #[instrument(skip(self))]
    pub fn reset(&self) -> Pending<(), OathError> {
        let session = self.clone();
        self.run(options(), move |channel| {
            send(channel, &Reset::new())?;
            let (token, response) = channel.reselect(Application::Oath)?;
            session.selected(&response)?;
            session.inner.binding.rebind(token);
            warn!("OATH applet reset");
            Ok(())
        })
    }
}

impl Session for OathSession {
    type Error = OathError;

    fn application(&self) -> Application {
        Application::Oath
    }

    fn smart_card(&self) -> &SmartCardInterface {
        &self.inner.card
    }

    fn binding(&self) -> &SessionBinding {
        &self.inner.binding
    }

    fn selected(&self, response: &Bytes) -> Result<()> {
        *self.inner.state.lock() = State::new(SelectInfo::parse(response)?);
        Ok(())
    }
}
