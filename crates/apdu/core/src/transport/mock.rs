//! Scripted transport for tests
//!
//! The transport is usually moved into a connection, so the command log is a
//! shared handle the test keeps.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use super::{CardTransport, TransportError};
use crate::command::MAX_SHORT_DATA;

type Handler = Box<dyn FnMut(&[u8]) -> Result<Bytes, TransportError> + Send>;

/// Commands written to a [`MockTransport`], in order
#[derive(Debug, Clone, Default)]
pub struct CommandLog(Arc<Mutex<Vec<Bytes>>>);

impl CommandLog {
    /// Every command sent so far
    pub fn sent(&self) -> Vec<Bytes> {
        self.0.lock().clone()
    }

    /// Every command sent so far, hex encoded
    pub fn sent_hex(&self) -> Vec<String> {
        self.0.lock().iter().map(hex::encode).collect()
    }

    /// Number of commands sent
    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    /// Whether nothing was sent
    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }

    fn push(&self, command: &[u8]) {
        self.0.lock().push(Bytes::copy_from_slice(command));
    }
}

/// Transport answering from a script or a closure
pub struct MockTransport {
    handler: Handler,
    log: CommandLog,
    connected: bool,
    max_frame: usize,
}

impl fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockTransport")
            .field("sent", &self.log.len())
            .field("connected", &self.connected)
            .field("max_frame", &self.max_frame)
            .finish()
    }
}

impl MockTransport {
    /// Answer each command with the next scripted response
    ///
    /// Once the script runs out every exchange fails with
    /// [`TransportError::Transmission`].
    pub fn new(responses: impl IntoIterator<Item = Bytes>) -> Self {
        let mut script: VecDeque<Bytes> = responses.into_iter().collect();
        Self::with_handler(move |_| script.pop_front().ok_or(TransportError::Transmission))
    }

    /// Scripted responses written as hex strings
    pub fn from_hex(responses: &[&str]) -> Self {
        Self::new(
            responses
                .iter()
                .map(|r| Bytes::from(hex::decode(r).unwrap_or_default())),
        )
    }

    /// Answer every command with `handler`
    pub fn with_handler(
        handler: impl FnMut(&[u8]) -> Result<Bytes, TransportError> + Send + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            log: CommandLog::default(),
            connected: true,
            max_frame: MAX_SHORT_DATA,
        }
    }

    /// Limit the data field of a single frame
    pub const fn with_max_frame(mut self, max_frame: usize) -> Self {
        self.max_frame = max_frame;
        self
    }

    /// Shared handle on the commands this transport receives
    pub fn log(&self) -> CommandLog {
        self.log.clone()
    }
}

impl CardTransport for MockTransport {
    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError> {
        if !self.connected {
            return Err(TransportError::Connection);
        }
        self.log.push(command);
        (self.handler)(command)
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn reset(&mut self) -> Result<(), TransportError> {
        self.connected = true;
        Ok(())
    }

    fn max_frame_size(&self) -> usize {
        self.max_frame
    }
}
