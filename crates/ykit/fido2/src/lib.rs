//! FIDO2 / CTAP2 application session
//!
//! [`Fido2Session`] speaks CTAP2 to a key through the ISO 7816 framing
//! (`80 10 00 00`). Requests and responses are CBOR maps. While the key waits
//! for a touch the session polls it and reports [`KeyState::TouchKey`] to
//! subscribers.
//!
//! PIN material only leaves the host encrypted under a secret agreed with the
//! key (PIN protocol one); see [`pin`].
//!
//! ```no_run
//! # use ykit_connection::Connection;
//! # fn demo(connection: &impl Connection) -> Result<(), ykit_fido2::Fido2Error> {
//! use ykit_fido2::{Fido2Config, Fido2Session, GetAssertionRequest};
//!
//! let session = Fido2Session::open(connection, Fido2Config::default()).wait()?;
//! let states = session.subscribe_key_state();
//! std::thread::spawn(move || {
//!     for state in states {
//!         println!("key: {state}");
//!     }
//! });
//! session.verify_pin("123456").wait()?;
//! let assertion = session
//!     .get_assertion(GetAssertionRequest::new("example.com", [0u8; 32]))
//!     .wait()?;
//! println!("signature counter {}", assertion.auth_data.sign_count);
//! # Ok(())
//! # }
//! ```
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

pub mod cbor;
pub mod commands;
mod config;
mod error;
pub mod pin;
mod session;
mod status;
pub mod types;

pub use config::{DEFAULT_TOUCH_POLL_INTERVAL, DEFAULT_TOUCH_TIMEOUT, Fido2Config};
pub use error::{Fido2Error, Result};
pub use session::{Fido2Session, KeyState};
pub use status::CtapStatus;
pub use types::{
    AuthenticatorData, AuthenticatorInfo, CredentialDescriptor, GetAssertionRequest,
    GetAssertionResponse, MakeCredentialRequest, MakeCredentialResponse, RelyingParty, User,
};
