//! CTAP2 over ISO 7816: `80 10 00 00 Lc [cmd][cbor]`
//!
//! Responses carry a CTAP status byte followed by an optional CBOR map. While
//! a request runs the key answers `91 00` with a keep-alive status byte and
//! expects a [`KeepAlive`] poll.

use bytes::{BufMut, Bytes, BytesMut};
use derive_more::Display;
use ykit_apdu_core::ApduCommand;

use crate::cbor::{self, MapBuilder, MapReader, Value};
use crate::error::Result;
use crate::pin::PIN_PROTOCOL;
use crate::status::CtapStatus;

const CLA: u8 = 0x80;
const INS_MSG: u8 = 0x10;
const INS_KEEP_ALIVE: u8 = 0x11;

/// Status word the key answers with while a request is still running
pub const SW_KEEP_ALIVE: u16 = 0x9100;
/// Keep-alive status byte: the key is still processing
pub const KEEP_ALIVE_PROCESSING: u8 = 0x01;
/// Keep-alive status byte: the key waits for user presence
pub const KEEP_ALIVE_UP_NEEDED: u8 = 0x02;

/// CTAP2 authenticator command
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum CtapCommand {
    #[display("authenticatorMakeCredential")]
    MakeCredential,
    #[display("authenticatorGetAssertion")]
    GetAssertion,
    #[display("authenticatorGetInfo")]
    GetInfo,
    #[display("authenticatorClientPIN")]
    ClientPin,
    #[display("authenticatorReset")]
    Reset,
    #[display("authenticatorGetNextAssertion")]
    GetNextAssertion,
}

impl CtapCommand {
    /// Command byte
    pub const fn code(self) -> u8 {
        match self {
            Self::MakeCredential => 0x01,
            Self::GetAssertion => 0x02,
            Self::GetInfo => 0x04,
            Self::ClientPin => 0x06,
            Self::Reset => 0x07,
            Self::GetNextAssertion => 0x08,
        }
    }

    /// Whether the key may wait for a touch before answering
    pub const fn may_need_touch(self) -> bool {
        matches!(self, Self::MakeCredential | Self::GetAssertion | Self::Reset)
    }
}

/// authenticatorClientPIN subcommands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum PinSubcommand {
    GetRetries = 0x01,
    GetKeyAgreement = 0x02,
    SetPin = 0x03,
    ChangePin = 0x04,
    GetPinToken = 0x05,
}

/// A CTAP2 request wrapped in an APDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CtapRequest {
    command: CtapCommand,
    data: Bytes,
}

impl CtapRequest {
    /// Request for `command` with an optional CBOR parameter map
    pub fn new(command: CtapCommand, parameters: Option<&Value>) -> Result<Self> {
        let mut data = BytesMut::new();
        data.put_u8(command.code());
        if let Some(parameters) = parameters {
            data.put_slice(&cbor::encode(parameters)?);
        }
        Ok(Self {
            command,
            data: data.freeze(),
        })
    }

    /// authenticatorClientPIN request for `subcommand` with extra parameters
    pub fn client_pin(
        subcommand: PinSubcommand,
        extra: impl FnOnce(MapBuilder) -> MapBuilder,
    ) -> Result<Self> {
        let parameters = extra(
            MapBuilder::new()
                .insert(1, cbor::int(PIN_PROTOCOL))
                .insert(2, cbor::int(subcommand as i64)),
        )
        .build();
        Self::new(CtapCommand::ClientPin, Some(&parameters))
    }

    /// CTAP command carried
    pub const fn command(&self) -> CtapCommand {
        self.command
    }
}

impl ApduCommand for CtapRequest {
    fn class(&self) -> u8 {
        CLA
    }

    fn instruction(&self) -> u8 {
        INS_MSG
    }

    fn p1(&self) -> u8 {
        0x00
    }

    fn p2(&self) -> u8 {
        0x00
    }

    fn data(&self) -> Option<&[u8]> {
        Some(&self.data)
    }
}

/// Poll sent while the key answers `91 00`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeepAlive;

impl ApduCommand for KeepAlive {
    fn class(&self) -> u8 {
        CLA
    }

    fn instruction(&self) -> u8 {
        INS_KEEP_ALIVE
    }

    fn p1(&self) -> u8 {
        0x00
    }

    fn p2(&self) -> u8 {
        0x00
    }

    fn data(&self) -> Option<&[u8]> {
        None
    }
}

/// Split a response into its status and CBOR map
///
/// A success with no body yields `None`.
pub fn parse_response(response: &[u8]) -> Result<Option<MapReader>> {
    let Some((&status, body)) = response.split_first() else {
        return Err(crate::error::Fido2Error::cbor("empty CTAP response"));
    };
    if status != 0 {
        return Err(CtapStatus::from_code(status).into());
    }
    if body.is_empty() {
        return Ok(None);
    }
    MapReader::decode(body).map(Some)
}
