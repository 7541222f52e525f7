//! Applications hosted on the key and the SELECT command that activates them

use crate::command::ApduCommand;

/// SELECT instruction
pub const INS_SELECT: u8 = 0xA4;

/// P1 for "select by DF name"
pub const P1_SELECT_BY_NAME: u8 = 0x04;

/// Applications with a fixed application identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum Application {
    /// Device management (capabilities, mode switching)
    Management,
    /// OTP slots, challenge-response
    ChallengeResponse,
    /// FIDO2 / CTAP2
    #[display("FIDO2")]
    Fido2,
    /// OATH HOTP/TOTP credentials
    #[display("OATH")]
    Oath,
    /// PIV smart card
    #[display("PIV")]
    Piv,
    /// FIDO U2F
    #[display("U2F")]
    U2f,
}

impl Application {
    /// Every known application
    pub const ALL: [Self; 6] = [
        Self::Management,
        Self::ChallengeResponse,
        Self::Fido2,
        Self::Oath,
        Self::Piv,
        Self::U2f,
    ];

    /// Byte-exact application identifier
    pub const fn aid(&self) -> &'static [u8] {
        match self {
            Self::Management => &[0xA0, 0x00, 0x00, 0x05, 0x27, 0x47, 0x11, 0x17],
            Self::ChallengeResponse => &[0xA0, 0x00, 0x00, 0x05, 0x27, 0x20, 0x01],
            // FIDO2 and U2F share the FIDO applet
            Self::Fido2 | Self::U2f => &[0xA0, 0x00, 0x00, 0x06, 0x47, 0x2F, 0x00, 0x01],
            Self::Oath => &[0xA0, 0x00, 0x00, 0x05, 0x27, 0x21, 0x01],
            Self::Piv => &[0xA0, 0x00, 0x00, 0x03, 0x08],
        }
    }
}

/// SELECT by AID: `00 A4 04 00 Lc AID`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectApplication {
    application: Application,
}

impl SelectApplication {
    /// Select `application`
    pub const fn new(application: Application) -> Self {
        Self { application }
    }

    /// Application being selected
    pub const fn application(&self) -> Application {
        self.application
    }
}

impl From<Application> for SelectApplication {
    fn from(application: Application) -> Self {
        Self::new(application)
    }
}

impl ApduCommand for SelectApplication {
    fn class(&self) -> u8 {
        0x00
    }

    fn instruction(&self) -> u8 {
        INS_SELECT
    }

    fn p1(&self) -> u8 {
        P1_SELECT_BY_NAME
    }

    fn p2(&self) -> u8 {
        0x00
    }

    fn data(&self) -> Option<&[u8]> {
        Some(self.application.aid())
    }
}
