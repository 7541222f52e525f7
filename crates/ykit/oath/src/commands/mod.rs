//! YKOATH command APDUs
//!
//! Every command is `00 INS P1 P2 [Lc data]` where the data is a run of
//! BER-TLV records. Builders validate their input and encode the records.

mod access;
mod calculate;
mod credentials;

pub use access::{Reset, SetCode, Validate};
use bytes::{BufMut, Bytes, BytesMut};
pub use calculate::{Calculate, CalculateAll};
pub use credentials::{Delete, List, Put, Rename};
use ykit_apdu_core::tlv::{Tlv, TlvError};

/// Defines an OATH command struct and its [`ykit_apdu_core::ApduCommand`] impl
macro_rules! oath_command {
    ($(#[$meta:meta])* $name:ident => $ins:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name {
            p1: u8,
            p2: u8,
            data: bytes::Bytes,
        }

        impl $name {
            fn raw(p1: u8, p2: u8, data: bytes::Bytes) -> Self {
                Self { p1, p2, data }
            }
        }

        impl ykit_apdu_core::ApduCommand for $name {
            fn class(&self) -> u8 {
                0x00
            }

            fn instruction(&self) -> u8 {
                $ins
            }

            fn p1(&self) -> u8 {
                self.p1
            }

            fn p2(&self) -> u8 {
                self.p2
            }

            fn data(&self) -> Option<&[u8]> {
                Some(&self.data)
            }
        }
    };
}

pub(crate) use oath_command;

/// Accumulates TLV records for a command body
#[derive(Debug, Default)]
pub(crate) struct Body(BytesMut);

impl Body {
    pub(crate) fn tlv(mut self, tag: u64, value: &[u8]) -> Result<Self, TlvError> {
        Tlv::new(tag, Bytes::copy_from_slice(value))?.write_to(&mut self.0)?;
        Ok(self)
    }

    /// Bytes written without a length, as the PROPERTY record is
    pub(crate) fn raw(mut self, bytes: &[u8]) -> Self {
        self.0.put_slice(bytes);
        self
    }

    pub(crate) fn finish(self) -> Bytes {
        self.0.freeze()
    }
}
