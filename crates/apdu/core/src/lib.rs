//! Core types for talking to hardware security keys over ISO/IEC 7816-4
//!
//! This crate provides the leaves every other `ykit` crate builds on:
//!
//! - Command APDUs and their serialization, including command chaining
//! - Response parsing and typed status words
//! - A BER-TLV codec used by the application protocols
//! - The application table (AIDs) and the SELECT command
//! - The byte-exchange primitive physical transports implement
//! - The continuation loop that reassembles `61XX` responses
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

// Re-export bytes for convenience
pub use bytes::{Bytes, BytesMut};

pub mod application;
pub mod command;
pub mod processor;
pub mod response;
pub mod tlv;
pub mod transport;

mod error;
pub use error::{Error, Result, ResultExt};

pub use application::{Application, SelectApplication};
pub use command::{ApduCommand, Command, ExpectedLength};
pub use processor::{CommandProcessor, SendRemaining};
pub use response::status::{StatusKind, StatusWord};
pub use response::Response;
pub use tlv::Tlv;
pub use transport::CardTransport;

/// Prelude module containing commonly used traits and types
pub mod prelude {
    pub use crate::{
        Application, Bytes, BytesMut, Command, Error, Response, Result, ResultExt,
        SelectApplication, SendRemaining, Tlv,
        command::ApduCommand,
        response::error::{ResponseError, StatusError},
        response::status::{StatusKind, StatusWord},
        transport::{CardTransport, TransportError},
    };
}
