//! PC/SC transport for desktop smart card readers
//!
//! [`PcscTransport`] implements [`ykit_apdu_core::CardTransport`] over one
//! reader. [`PcscDriver`] implements [`ykit_connection::AccessoryDriver`]: it
//! watches the readers and reports a key as attached while a usable card sits
//! in one of them, so an [`ykit_connection::AccessoryConnection`] can open and
//! close sessions as keys come and go.
//!
//! ```no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//!
//! use ykit_connection::{ConnectionConfig, KeyContext};
//! use ykit_transport_pcsc::{PcscConfig, PcscDriver};
//!
//! let driver = PcscDriver::new(PcscConfig::new().with_reader_filter("yubico"))?;
//! let context = KeyContext::new(ConnectionConfig::new()).with_accessory_driver(Arc::new(driver))?;
//! if let Some(accessory) = context.accessory() {
//!     accessory.start_synchronous();
//! }
//! # Ok(())
//! # }
//! ```
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

mod config;
mod driver;
mod error;
mod reader;
mod transport;

pub use config::{AtrPattern, DEFAULT_POLL_INTERVAL, PcscConfig, ShareMode};
pub use driver::{PcscDriver, list_readers};
pub use error::PcscError;
pub use reader::PcscReader;
pub use transport::PcscTransport;

// Re-export some pcsc types for convenience
pub use pcsc::{Context, Protocols, Scope};
