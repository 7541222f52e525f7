//! APDU command definitions and traits
//!
//! This module provides types and traits for working with APDU commands
//! according to ISO/IEC 7816-4. Only short APDUs are produced; payloads larger
//! than one frame are split with [`Command::chain`].

pub mod error;

use bytes::{BufMut, Bytes, BytesMut};

pub use error::CommandError;

/// Expected length type for APDU commands (`0x00` requests 256 bytes)
pub type ExpectedLength = u8;

/// Largest data field a short APDU can carry
pub const MAX_SHORT_DATA: usize = 255;

/// Class bit marking a frame as "more frames follow"
pub const CLA_CHAINING: u8 = 0x10;

/// Core trait for APDU commands
pub trait ApduCommand {
    /// Command class (CLA)
    fn class(&self) -> u8;

    /// Instruction code (INS)
    fn instruction(&self) -> u8;

    /// First parameter (P1)
    fn p1(&self) -> u8;

    /// Second parameter (P2)
    fn p2(&self) -> u8;

    /// Command payload data (optional)
    fn data(&self) -> Option<&[u8]>;

    /// Expected response length (optional)
    fn expected_length(&self) -> Option<ExpectedLength> {
        None
    }

    /// Convert to raw APDU bytes
    ///
    /// The data field must fit a short APDU; the engine chains longer payloads
    /// before serializing them.
    fn to_bytes(&self) -> Bytes {
        let mut buffer = BytesMut::with_capacity(self.command_length());

        // Header: CLA, INS, P1, P2
        buffer.put_u8(self.class());
        buffer.put_u8(self.instruction());
        buffer.put_u8(self.p1());
        buffer.put_u8(self.p2());

        if let Some(data) = self.data().filter(|d| !d.is_empty()) {
            buffer.put_u8(data.len() as u8);
            buffer.put_slice(data);
        }

        if let Some(le) = self.expected_length() {
            buffer.put_u8(le);
        }

        buffer.freeze()
    }

    /// Calculate length of serialized command
    fn command_length(&self) -> usize {
        let data = self.data().map_or(0, |d| if d.is_empty() { 0 } else { 1 + d.len() });
        4 + data + usize::from(self.expected_length().is_some())
    }

    /// Convert to a generic Command
    fn to_command(&self) -> Command {
        Command {
            cla: self.class(),
            ins: self.instruction(),
            p1: self.p1(),
            p2: self.p2(),
            data: self.data().filter(|d| !d.is_empty()).map(Bytes::copy_from_slice),
            le: self.expected_length(),
        }
    }
}

/// Generic APDU command structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Command class byte
    pub cla: u8,
    /// Instruction byte
    pub ins: u8,
    /// Parameter 1
    pub p1: u8,
    /// Parameter 2
    pub p2: u8,
    /// Command data (optional)
    pub data: Option<Bytes>,
    /// Expected length (optional)
    pub le: Option<ExpectedLength>,
}

impl Command {
    /// Create a new command with just the header bytes
    pub const fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: None,
            le: None,
        }
    }

    /// Create a new command with expected response length (Le)
    pub const fn new_with_le(cla: u8, ins: u8, p1: u8, p2: u8, le: ExpectedLength) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: None,
            le: Some(le),
        }
    }

    /// Create a new command with data payload
    pub fn new_with_data<T: Into<Bytes>>(cla: u8, ins: u8, p1: u8, p2: u8, data: T) -> Self {
        Self::new(cla, ins, p1, p2).with_data(data)
    }

    /// Set the data field
    pub fn with_data<T: Into<Bytes>>(mut self, data: T) -> Self {
        let data = data.into();
        self.data = (!data.is_empty()).then_some(data);
        self
    }

    /// Set the expected length field
    pub const fn with_le(mut self, le: ExpectedLength) -> Self {
        self.le = Some(le);
        self
    }

    /// Data length in bytes
    pub fn data_len(&self) -> usize {
        self.data.as_ref().map_or(0, Bytes::len)
    }

    /// Check the command fits a single short APDU
    pub fn validate(&self) -> Result<(), CommandError> {
        if self.data_len() > MAX_SHORT_DATA {
            return Err(CommandError::DataTooLong {
                len: self.data_len(),
                max: MAX_SHORT_DATA,
            });
        }
        Ok(())
    }

    /// Whether this frame has the chaining bit set
    pub const fn is_chained(&self) -> bool {
        self.cla & CLA_CHAINING != 0
    }

    /// Split the command into frames of at most `max_frame` data bytes
    ///
    /// Every frame except the last carries the chaining bit in its class byte and
    /// no Le. A command that already fits is returned unchanged as a single frame.
    pub fn chain(&self, max_frame: usize) -> Result<Vec<Self>, CommandError> {
        if max_frame == 0 {
            return Err(CommandError::ZeroFrameSize);
        }
        let max_frame = max_frame.min(MAX_SHORT_DATA);

        let Some(data) = self.data.as_ref().filter(|d| d.len() > max_frame) else {
            return Ok(vec![self.clone()]);
        };

        let count = data.len().div_ceil(max_frame);
        let frames = (0..count)
            .map(|index| {
                let start = index * max_frame;
                let end = (start + max_frame).min(data.len());
                let chunk = data.slice(start..end);
                if index + 1 == count {
                    Self {
                        data: Some(chunk),
                        ..self.clone()
                    }
                } else {
                    Self {
                        cla: self.cla | CLA_CHAINING,
                        data: Some(chunk),
                        le: None,
                        ..self.clone()
                    }
                }
            })
            .collect();

        Ok(frames)
    }

    /// Parse a command from raw bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, CommandError> {
        let [cla, ins, p1, p2, body @ ..] = data else {
            return Err(CommandError::InvalidLength(data.len()));
        };

        let mut command = Self::new(*cla, *ins, *p1, *p2);

        match body {
            [] => {}
            // Only Le present, no data
            [le] => command.le = Some(*le),
            [lc, rest @ ..] => {
                let lc = *lc as usize;
                if rest.len() < lc || rest.len() > lc + 1 {
                    return Err(CommandError::InvalidLength(data.len()));
                }
                command.data = Some(Bytes::copy_from_slice(&rest[..lc]));
                command.le = rest.get(lc).copied();
            }
        }

        Ok(command)
    }
}

impl ApduCommand for Command {
    fn class(&self) -> u8 {
        self.cla
    }

    fn instruction(&self) -> u8 {
        self.ins
    }

    fn p1(&self) -> u8 {
        self.p1
    }

    fn p2(&self) -> u8 {
        self.p2
    }

    fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    fn expected_length(&self) -> Option<ExpectedLength> {
        self.le
    }

    fn to_command(&self) -> Command {
        self.clone()
    }
}
