//! FIDO2 session over a [`SmartCardInterface`]

use std::sync::Arc;
use std::thread;

use bytes::Bytes;
use crossbeam_channel::Receiver;
use derive_more::Display;
use parking_lot::Mutex;
use tracing::{debug, instrument, trace, warn};
use ykit_apdu_core::{ApduCommand, Application, Error, SendRemaining};
use ykit_connection::observe::Observable;
use ykit_connection::{
    CardChannel, CommandOptions, Connection, Pending, Session, SessionBinding, SmartCardInterface,
};
use zeroize::Zeroizing;

use crate::cbor::{self, MapReader, Value};
use crate::commands::{
    CtapCommand, CtapRequest, KEEP_ALIVE_PROCESSING, KEEP_ALIVE_UP_NEEDED, KeepAlive, PinSubcommand,
    SW_KEEP_ALIVE, parse_response,
};
use crate::config::Fido2Config;
use crate::error::{Fido2Error, Result};
use crate::pin::{self, KeyAgreement};
use crate::types::{
    AuthenticatorInfo, GetAssertionRequest, GetAssertionResponse, MakeCredentialRequest,
    MakeCredentialResponse,
};

/// What the key is doing for this session
#[derive(Debug, Display, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum KeyState {
    /// No request in flight
    #[default]
    #[display("idle")]
    Idle,
    /// A request is being processed
    #[display("processing request")]
    ProcessingRequest,
    /// The key waits for the user to touch it
    #[display("touch key")]
    TouchKey,
}

impl KeyState {
    /// State a keep-alive status byte announces; `None` keeps the current one
    fn from_keep_alive(status: Option<u8>) -> Option<Self> {
        match status? {
            KEEP_ALIVE_PROCESSING => Some(Self::ProcessingRequest),
            KEEP_ALIVE_UP_NEEDED => Some(Self::TouchKey),
            _ => None,
        }
    }
}

/// Marks a request in flight; back to [`KeyState::Idle`] when dropped
struct Processing<'a>(&'a Observable<KeyState>);

impl<'a> Processing<'a> {
    fn start(state: &'a Observable<KeyState>) -> Self {
        state.set(KeyState::ProcessingRequest);
        Self(state)
    }
}

impl Drop for Processing<'_> {
    fn drop(&mut self) {
        self.0.set(KeyState::Idle);
    }
}

#[derive(Debug)]
struct Inner {
    card: SmartCardInterface,
    binding: SessionBinding,
    config: Fido2Config,
    key_state: Observable<KeyState>,
    pin_token: Mutex<Option<Zeroizing<Vec<u8>>>>,
}

impl Inner {
    /// `pinAuth` over `client_data_hash` with the token stored when this runs
    fn pin_auth(&self, client_data_hash: &[u8], required: bool) -> Result<Option<[u8; 16]>> {
        match self.pin_token.lock().as_ref() {
            Some(token) => pin::authenticate(token, client_data_hash).map(Some),
            None if required => Err(Fido2Error::PinTokenRequired),
            None => Ok(None),
        }
    }
}

/// Session with the FIDO2 application
///
/// Cheap to clone; clones share the key state and the PIN token.
#[derive(Debug, Clone)]
pub struct Fido2Session {
    inner: Arc<Inner>,
}


fn expect_map(response: Option<MapReader>) -> Result<MapReader> {
    response.ok_or_else(|| Fido2Error::cbor("response has no CBOR map"))
}

/// One queue entry's view of the authenticator
struct Ctap<'c, 'a> {
    channel: &'c mut CardChannel<'a>,
    inner: &'c Inner,
}

impl Ctap<'_, '_> {
    /// Send `request`, polling with keep-alives while the key waits for a touch
    fn send(&mut self, request: &CtapRequest) -> Result<Option<MapReader>> {
        trace!(command = %request.command(), "Sending CTAP request");
        let mut response = self
            .channel
            .transmit_response(&request.to_command(), SendRemaining::GetResponse)?;
        while response.status().to_u16() == SW_KEEP_ALIVE {
            if let Some(state) = KeyState::from_keep_alive(response.data().first().copied()) {
                if self.inner.key_state.set(state) {
                    debug!(command = %request.command(), %state, "Key state changed");
                }
            }
            let remaining = self.channel.remaining();
            if remaining.is_zero() {
                return Err(Error::Timeout.into());
            }
            thread::sleep(self.inner.config.touch_poll_interval.min(remaining));
            response = self
                .channel
                .transmit_response(&KeepAlive.to_command(), SendRemaining::GetResponse)?;
        }
        parse_response(&response.into_bytes_result().map_err(Error::from)?)
    }

    fn call(
        &mut self,
        command: CtapCommand,
        parameters: Option<&Value>,
    ) -> Result<Option<MapReader>> {
        self.send(&CtapRequest::new(command, parameters)?)
    }

    fn key_agreement(&mut self) -> Result<KeyAgreement> {
        let request = CtapRequest::client_pin(PinSubcommand::GetKeyAgreement, |map| map)?;
        let response = expect_map(self.send(&request)?)?;
        KeyAgreement::new(response.require(1)?)
    }
}

impl Fido2Session {
    /// Select the FIDO2 application on `connection` and open a session
    #[instrument(skip_all)]
    pub fn open(connection: &impl Connection, config: Fido2Config) -> Pending<Self, Fido2Error> {
        let card = match connection.smart_card() {
            Ok(card) => card,
            Err(error) => return Pending::ready(Err(error.into())),
        };
        let session_card = card.clone();
        card.submit(CommandOptions::new(), move |channel| {
            let (token, _) = channel.reselect(Application::Fido2)?;
            debug!("FIDO2 session opened");
            Ok(Self {
                inner: Arc::new(Inner {
                    card: session_card,
                    binding: SessionBinding::new(token),
                    config,
                    key_state: Observable::new(KeyState::Idle),
                    pin_token: Mutex::new(None),
                }),
            })
        })
    }

    /// Current key state
    pub fn key_state(&self) -> KeyState {
        self.inner.key_state.get()
    }

    /// Receive every future key state
    pub fn subscribe_key_state(&self) -> Receiver<KeyState> {
        self.inner.key_state.subscribe()
    }

    /// Whether [`Fido2Session::verify_pin`] left a PIN token
    pub fn has_pin_token(&self) -> bool {
        self.inner.pin_token.lock().is_some()
    }

    /// Forget the PIN token
    pub fn clear_user_verification(&self) {
        if self.inner.pin_token.lock().take().is_some() {
            debug!("PIN token cleared");
        }
    }

    fn perform<T, F>(&self, touch: bool, task: F) -> Pending<T, Fido2Error>
    where
        T: Send + 'static,
        F: FnOnce(&mut Ctap<'_, '_>) -> Result<T> + Send + 'static,
    {
        let options = if touch {
            CommandOptions::new().with_timeout(self.inner.config.touch_timeout)
        } else {
            CommandOptions::new()
        };
        let session = self.clone();
        self.run(options, move |channel| {
            let inner = &*session.inner;
            let _processing = Processing::start(&inner.key_state);
            task(&mut Ctap { channel, inner })
        })
    }

    /// authenticatorGetInfo
    #[instrument(skip(self))]
    pub fn get_info(&self) -> Pending<AuthenticatorInfo, Fido2Error> {
        self.perform(false, |ctap| {
            AuthenticatorInfo::from_map(&expect_map(ctap.call(CtapCommand::GetInfo, None)?)?)
        })
    }

    /// PIN attempts left before the key blocks
    #[instrument(skip(self))]
    pub fn get_pin_retries(&self) -> Pending<u64, Fido2Error> {
        self.perform(false, |ctap| {
            let request = CtapRequest::client_pin(PinSubcommand::GetRetries, |map| map)?;
            cbor::as_u64(expect_map(ctap.send(&request)?)?.require(3)?)
        })
    }

    /// Exchange `pin` for a PIN token used by later requests
    #[instrument(skip_all)]
    pub fn verify_pin(&self, pin: &str) -> Pending<(), Fido2Error> {
        if let Err(error) = pin::validate_pin(pin) {
            return Pending::ready(Err(error));
        }
        let pin = Zeroizing::new(pin.to_owned());
        let session = self.clone();
        self.perform(false, move |ctap| {
            session.clear_user_verification();
            let agreement = ctap.key_agreement()?;
            let pin_hash_enc = agreement.pin_hash_enc(&pin)?;
            let request = CtapRequest::client_pin(PinSubcommand::GetPinToken, |map| {
                map.insert(3, agreement.platform_key.clone())
                    .insert(6, cbor::bytes(&pin_hash_enc))
            })?;
            let response = match ctap.send(&request) {
                Err(error) if error.ctap_status().is_some_and(|s| s.is_pin_error()) => {
                    warn!(%error, "PIN rejected");
                    return Err(error);
                }
                other => expect_map(other?)?,
            };
            let token = agreement.decrypt_token(cbor::as_bytes(response.require(2)?)?)?;
            *session.inner.pin_token.lock() = Some(token);
            debug!("PIN verified");
            Ok(())
        })
    }

    /// Set the first PIN on a key that has none
    #[instrument(skip_all)]
    pub fn set_pin(&self, pin: &str) -> Pending<(), Fido2Error> {
        if let Err(error) = pin::validate_pin(pin) {
            return Pending::ready(Err(error));
        }
        let pin = Zeroizing::new(pin.to_owned());
        self.perform(false, move |ctap| {
            let agreement = ctap.key_agreement()?;
            let new_pin_enc = agreement.new_pin_enc(&pin)?;
            let pin_auth = agreement.authenticate(&new_pin_enc)?;
            let request = CtapRequest::client_pin(PinSubcommand::SetPin, |map| {
                map.insert(3, agreement.platform_key.clone())
                    .insert(4, cbor::bytes(&pin_auth))
                    .insert(5, cbor::bytes(&new_pin_enc))
            })?;
            ctap.send(&request)?;
            debug!("PIN set");
            Ok(())
        })
    }

    /// Replace `current` with `new`; drops the PIN token
    #[instrument(skip_all)]
    pub fn change_pin(&self, current: &str, new: &str) -> Pending<(), Fido2Error> {
        if let Err(error) = pin::validate_pin(current).and_then(|()| pin::validate_pin(new)) {
            return Pending::ready(Err(error));
        }
        let current = Zeroizing::new(current.to_owned());
        let new = Zeroizing::new(new.to_owned());
        let session = self.clone();
        self.perform(false, move |ctap| {
            session.clear_user_verification();
            let agreement = ctap.key_agreement()?;
            let pin_hash_enc = agreement.pin_hash_enc(&current)?;
            let new_pin_enc = agreement.new_pin_enc(&new)?;
            let message = [new_pin_enc.as_slice(), pin_hash_enc.as_slice()].concat();
            let pin_auth = agreement.authenticate(&message)?;
            let request = CtapRequest::client_pin(PinSubcommand::ChangePin, |map| {
                map.insert(3, agreement.platform_key.clone())
                    .insert(4, cbor::bytes(&pin_auth))
                    .insert(5, cbor::bytes(&new_pin_enc))
                    .insert(6, cbor::bytes(&pin_hash_enc))
            })?;
            ctap.send(&request)?;
            debug!("PIN changed");
            Ok(())
        })
    }

    /// authenticatorMakeCredential
    ///
    /// Signs with the PIN token stored when the request runs. May wait for a
    /// touch.
    #[instrument(skip_all, fields(rp = %request.rp.id))]
    pub fn make_credential(
        &self,
        request: MakeCredentialRequest,
    ) -> Pending<MakeCredentialResponse, Fido2Error> {
        self.perform(true, move |ctap| {
            let pin_auth = ctap.inner.pin_auth(&request.client_data_hash, request.require_pin)?;
            let parameters = request.to_value(pin_auth);
            let response = ctap.call(CtapCommand::MakeCredential, Some(&parameters))?;
            let response = MakeCredentialResponse::from_map(&expect_map(response)?)?;
            debug!(fmt = %response.fmt, "Credential created");
            Ok(response)
        })
    }

    /// authenticatorGetAssertion
    ///
    /// Signs with the PIN token stored when the request runs. May wait for a
    /// touch.
    #[instrument(skip_all, fields(rp = %request.rp_id))]
    pub fn get_assertion(
        &self,
        request: GetAssertionRequest,
    ) -> Pending<GetAssertionResponse, Fido2Error> {
        self.perform(true, move |ctap| {
            let pin_auth = ctap.inner.pin_auth(&request.client_data_hash, request.require_pin)?;
            let response = ctap.call(CtapCommand::GetAssertion, Some(&request.to_value(pin_auth)))?;
            GetAssertionResponse::from_map(&expect_map(response)?)
        })
    }

    /// Next assertion after a get-assertion that reported several credentials
    #[instrument(skip(self))]
    pub fn get_next_assertion(&self) -> Pending<GetAssertionResponse, Fido2Error> {
        self.perform(false, |ctap| {
            let response = ctap.call(CtapCommand::GetNextAssertion, None)?;
            GetAssertionResponse::from_map(&expect_map(response)?)
        })
    }

    /// Delete every credential and the PIN
    ///
    /// Keys only accept this shortly after power-up, and want a touch.
    #[instrument(skip(self))]
    pub fn reset(&self) -> Pending<(), Fido2Error> {
        let session = self.clone();
        self.perform(true, move |ctap| {
            ctap.call(CtapCommand::Reset, None)?;
            session.clear_user_verification();
            warn!("FIDO2 application reset");
            Ok(())
        })
    }
}

impl Session for Fido2Session {
    type Error = Fido2Error;

    fn application(&self) -> Application {
        Application::Fido2
    }

    fn smart_card(&self) -> &SmartCardInterface {
        &self.inner.card
    }

    fn binding(&self) -> &SessionBinding {
        &self.inner.binding
    }

    fn selected(&self, _response: &Bytes) -> Result<()> {
        self.clear_user_verification();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ykit_apdu_core::response::error::StatusError;

    #[test]
    fn test_keep_alive_detection() {
        assert!(is_keep_alive(&Error::from(StatusError::new(0x91, 0x00))));
        assert!(!is_keep_alive(&Error::from(StatusError::new(0x90, 0x00))));
        assert!(!is_keep_alive(&Error::Timeout));
    }

    #[test]
    fn test_processing_guard() {
        let state = Observable::new(KeyState::Idle);
        let updates = state.subscribe();
        {
            let _processing = Processing::start(&state);
            assert_eq!(state.get(), KeyState::ProcessingRequest);
            state.set(KeyState::TouchKey);
        }
        assert_eq!(state.get(), KeyState::Idle);
        let seen: Vec<_> = updates.try_iter().collect();
        assert_eq!(seen, vec![KeyState::ProcessingRequest, KeyState::TouchKey, KeyState::Idle]);
    }
}
