//! Command processing: chaining outgoing frames and reassembling `61XX` responses
//!
//! [`CommandProcessor`] owns the ISO 7816-4 mechanics that sit between a logical
//! command and the byte exchange. It never retries a status word; the only
//! automatic follow-up it sends is the continuation request for "more data".

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace};

use crate::command::{ApduCommand, Command, MAX_SHORT_DATA};
use crate::response::Response;
use crate::response::error::StatusError;
use crate::Error;

/// Default cap on continuations for a single command
pub const DEFAULT_MAX_CHAINS: usize = 64;

/// Instruction used to fetch the rest of a `61XX` response
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SendRemaining {
    /// ISO GET RESPONSE: `00 C0 00 00 XX`
    #[default]
    GetResponse,
    /// OATH SEND REMAINING: `00 A5 00 00`
    Oath,
}

impl SendRemaining {
    /// Continuation command for `available` announced bytes
    pub const fn command(self, available: u8) -> Command {
        match self {
            Self::GetResponse => Command::new_with_le(0x00, 0xC0, 0x00, 0x00, available),
            Self::Oath => Command::new(0x00, 0xA5, 0x00, 0x00),
        }
    }
}

/// Drives one logical command across as many exchanges as it needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandProcessor {
    send_remaining: SendRemaining,
    max_chains: usize,
    max_frame: usize,
}

impl Default for CommandProcessor {
    fn default() -> Self {
        Self::new(SendRemaining::GetResponse)
    }
}

impl CommandProcessor {
    /// Processor fetching remaining data with `send_remaining`
    pub const fn new(send_remaining: SendRemaining) -> Self {
        Self {
            send_remaining,
            max_chains: DEFAULT_MAX_CHAINS,
            max_frame: MAX_SHORT_DATA,
        }
    }

    /// Set the continuation cap
    pub const fn with_max_chains(mut self, max_chains: usize) -> Self {
        self.max_chains = max_chains;
        self
    }

    /// Set the frame limit for outgoing data
    pub const fn with_max_frame(mut self, max_frame: usize) -> Self {
        self.max_frame = max_frame;
        self
    }

    /// Continuation variant in use
    pub const fn send_remaining(&self) -> SendRemaining {
        self.send_remaining
    }

    /// Run `command` through `exchange` and return the assembled payload
    ///
    /// `exchange` performs exactly one request/response round trip. Chained
    /// frames must each be acknowledged with `90 00`; the final frame's response
    /// is followed through every `61XX` continuation and the payloads are
    /// concatenated in arrival order.
    pub fn process<F>(&self, command: &Command, exchange: F) -> Result<Bytes, Error>
    where
        F: FnMut(&[u8]) -> Result<Bytes, Error>,
    {
        let response = self.process_response(command, exchange)?;
        let status = response.status();
        if !status.is_success() {
            debug!(sw = %status, description = status.description(), "Command failed");
        }
        Ok(response.into_bytes_result()?)
    }

    /// Like [`CommandProcessor::process`], but hands back the final response
    /// whatever its status word
    ///
    /// The payload holds every `61XX` continuation plus the final frame's
    /// data. A rejected chained frame is still an error.
    pub fn process_response<F>(&self, command: &Command, mut exchange: F) -> Result<Response, Error>
    where
        F: FnMut(&[u8]) -> Result<Bytes, Error>,
    {
        let frames = command.chain(self.max_frame)?;
        let Some((last, leading)) = frames.split_last() else {
            return Err(Error::protocol("command produced no frames"));
        };

        for frame in leading {
            let response = Response::from_bytes(&exchange(&frame.to_bytes())?)?;
            if !response.is_success() {
                debug!(sw = %response.status(), "Chained frame rejected");
                return Err(StatusError::from(response.status()).into());
            }
        }
        if !leading.is_empty() {
            trace!(frames = frames.len(), "Sent chained command");
        }

        let mut response = Response::from_bytes(&exchange(&last.to_bytes())?)?;
        let mut payload = BytesMut::new();
        let mut chains = 0;

        while let Some(available) = response.status().remaining_bytes() {
            if chains == self.max_chains {
                return Err(Error::ChainLimitExceeded(chains));
            }
            chains += 1;
            payload.extend_from_slice(response.data());
            trace!(chains, available, "Fetching remaining response data");

            let next = self.send_remaining.command(available);
            response = Response::from_bytes(&exchange(&next.to_bytes())?)?;
        }

        payload.extend_from_slice(response.data());
        let payload = (!payload.is_empty()).then(|| payload.freeze());
        Ok(Response::new(payload, response.status()))
    }
}
