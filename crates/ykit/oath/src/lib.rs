//! YKOATH application session
//!
//! [`OathSession`] stores and calculates TOTP/HOTP credentials on a key over a
//! [`ykit_connection::SmartCardInterface`]. Password protected applets are
//! unlocked with a mutual HMAC handshake; until then no command reaches the
//! card.
//!
//! ```no_run
//! # use ykit_connection::{Connection, Session};
//! # fn demo(connection: &impl Connection) -> Result<(), ykit_oath::OathError> {
//! use ykit_oath::{OathSession, otp};
//!
//! let session = OathSession::open(connection).wait()?;
//! if session.is_locked() {
//!     session.unlock("hunter2").wait()?;
//! }
//! for entry in session.calculate_all(otp::unix_now()).wait()? {
//!     println!("{}: {:?}", entry.credential, entry.code.map(|c| c.value));
//! }
//! # Ok(())
//! # }
//! ```
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

pub mod commands;
pub mod constants;
pub mod credential;
mod error;
pub mod otp;
mod session;
mod version;

pub use credential::{
    Code, Credential, CredentialTemplate, CredentialWithCode, HashAlgorithm, OathType,
};
pub use error::{OathError, Result};
pub use session::{OathSession, SelectInfo, derive_access_key};
pub use version::Version;
