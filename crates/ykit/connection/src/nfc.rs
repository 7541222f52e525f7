//! NFC tag session connection
//!
//! Mirrors the accessory connection: a lifecycle thread serializes caller
//! requests with reader notifications. Connecting to a discovered tag is
//! retried with bounded backoff because the first attempt often races the
//! radio field settling.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam_channel::{Receiver, Sender, unbounded};
use derive_more::Display;
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use ykit_apdu_core::prelude::*;

use crate::config::ConnectionConfig;
use crate::event::{ConnectionEvent, ConnectionKind};
use crate::observe::{EventHub, Observable};
use crate::smart_card::SmartCardInterface;

/// Lifecycle state of the NFC connection
#[derive(Debug, Display, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum NfcState {
    /// No reader session
    #[default]
    Closed,
    /// Reader session running, waiting for a tag
    Polling,
    /// Connected to a tag; commands can be submitted
    Open,
}

/// Tag reported by the reader
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NfcTag {
    /// Tag UID
    pub identifier: Vec<u8>,
    /// ISO 14443-4 historical bytes
    pub historical_bytes: Option<Vec<u8>>,
}

/// How the reader session should end
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NfcCompletion {
    /// End quietly
    Success,
    /// End showing a confirmation message
    Message(String),
    /// End showing an error message
    Error(String),
}

/// Why the platform ended the reader session
#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum NfcInvalidation {
    /// The user dismissed the reader
    #[display("user cancelled the NFC session")]
    UserCancelled,
    /// The reader session timed out
    #[display("NFC session timed out")]
    Timeout,
    /// Any other platform reason
    #[display("NFC session invalidated: {_0}")]
    Other(String),
}

impl From<NfcInvalidation> for Error {
    fn from(reason: NfcInvalidation) -> Self {
        match reason {
            NfcInvalidation::UserCancelled => Self::Cancelled,
            NfcInvalidation::Timeout => Self::Timeout,
            NfcInvalidation::Other(message) => Self::Transport(TransportError::other(message)),
        }
    }
}

/// Platform NFC reader
pub trait NfcReader: Send + Sync + fmt::Debug {
    /// Start polling; discoveries and invalidations go to `events`
    fn begin_session(&self, events: NfcEvents, alert: Option<&str>) -> Result<(), TransportError>;

    /// Update the message shown while the session runs
    fn set_alert_message(&self, message: &str);

    /// Open the byte pipe to a discovered tag
    fn connect(&self, tag: &NfcTag) -> Result<Box<dyn CardTransport>, TransportError>;

    /// End the reader session
    fn invalidate(&self, completion: NfcCompletion);
}

#[derive(Debug)]
enum Message {
    Start(Option<String>),
    Stop(NfcCompletion),
    Discovered(NfcTag),
    TagLost,
    Invalidated(NfcInvalidation),
    Shutdown,
}

/// Sink for reader notifications
#[derive(Debug, Clone)]
pub struct NfcEvents(Sender<Message>);

impl NfcEvents {
    /// A tag entered the field
    pub fn discovered(&self, tag: NfcTag) {
        let _ = self.0.send(Message::Discovered(tag));
    }

    /// The connected tag left the field
    pub fn tag_lost(&self) {
        let _ = self.0.send(Message::TagLost);
    }

    /// The platform ended the reader session
    pub fn invalidated(&self, reason: NfcInvalidation) {
        let _ = self.0.send(Message::Invalidated(reason));
    }
}

struct Shared {
    state: Observable<NfcState>,
    events: EventHub<ConnectionEvent>,
    card: Mutex<Option<SmartCardInterface>>,
    tag: Mutex<Option<NfcTag>>,
    config: ConnectionConfig,
}

/// Connection to a key over an NFC reader session
pub struct NfcConnection {
    shared: Arc<Shared>,
    reader: Arc<dyn NfcReader>,
    messages: Sender<Message>,
    lifecycle: Option<JoinHandle<()>>,
    lifecycle_id: ThreadId,
}

impl fmt::Debug for NfcConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NfcConnection")
            .field("state", &self.state())
            .field("reader", &self.reader)
            .finish()
    }
}

impl NfcConnection {
    /// Create a closed connection using `reader`
    pub fn new(reader: Arc<dyn NfcReader>, config: ConnectionConfig) -> Result<Self, Error> {
        let shared = Arc::new(Shared {
            state: Observable::new(NfcState::Closed),
            events: EventHub::new(),
            card: Mutex::new(None),
            tag: Mutex::new(None),
            config,
        });
        let (messages, inbox) = unbounded();

        let lifecycle = Lifecycle {
            shared: shared.clone(),
            reader: reader.clone(),
            events: NfcEvents(messages.clone()),
        };
        let handle = thread::Builder::new()
            .name("ykit-nfc".into())
            .spawn(move || lifecycle.run(&inbox))
            .map_err(|e| Error::message(format!("failed to spawn NFC thread: {e}")))?;

        Ok(Self {
            shared,
            reader,
            messages,
            lifecycle_id: handle.thread().id(),
            lifecycle: Some(handle),
        })
    }

    /// Begin a reader session
    ///
    /// No-op unless the connection is closed.
    pub fn start(&self) {
        let _ = self.messages.send(Message::Start(None));
    }

    /// Begin a reader session showing `alert`
    pub fn start_with_message(&self, alert: impl Into<String>) {
        let _ = self.messages.send(Message::Start(Some(alert.into())));
    }

    /// End the reader session
    pub fn stop(&self) {
        self.stop_with(NfcCompletion::Success);
    }

    /// End the reader session showing a confirmation message
    pub fn stop_with_message(&self, message: impl Into<String>) {
        self.stop_with(NfcCompletion::Message(message.into()));
    }

    /// End the reader session showing an error message
    pub fn stop_with_error_message(&self, message: impl Into<String>) {
        self.stop_with(NfcCompletion::Error(message.into()));
    }

    fn stop_with(&self, completion: NfcCompletion) {
        let _ = self.messages.send(Message::Stop(completion));
    }

    /// Start and wait until a tag is connected
    pub fn start_synchronous(&self) -> bool {
        self.assert_may_block();
        self.start();
        self.shared
            .state
            .wait_for(self.shared.config.sync_timeout, |s| *s == NfcState::Open)
    }

    /// Stop and wait until the session is closed
    pub fn stop_synchronous(&self) -> bool {
        self.assert_may_block();
        self.stop();
        self.shared
            .state
            .wait_for(self.shared.config.sync_timeout, |s| *s == NfcState::Closed)
    }

    /// Update the reader's alert message
    pub fn set_alert_message(&self, message: &str) {
        self.reader.set_alert_message(message);
    }

    /// Current lifecycle state
    pub fn state(&self) -> NfcState {
        self.shared.state.get()
    }

    /// Receive every future state change
    pub fn subscribe_state(&self) -> Receiver<NfcState> {
        self.shared.state.subscribe()
    }

    /// Receive connection events
    pub fn events(&self) -> Receiver<ConnectionEvent> {
        self.shared.events.subscribe()
    }

    pub(crate) fn forward_events(&self, sender: Sender<ConnectionEvent>) {
        self.shared.events.forward_to(sender);
    }

    /// Tag the session is connected to
    pub fn tag_description(&self) -> Option<NfcTag> {
        self.shared.tag.lock().clone()
    }

    /// Engine for the connected tag
    pub fn smart_card(&self) -> Result<SmartCardInterface, Error> {
        if self.state() != NfcState::Open {
            return Err(Error::NotConnected);
        }
        self.shared.card.lock().clone().ok_or(Error::NotConnected)
    }

    /// Cancel queued commands on the connected tag
    pub fn cancel_commands(&self) -> usize {
        self.shared
            .card
            .lock()
            .as_ref()
            .map_or(0, SmartCardInterface::cancel_commands)
    }

    fn assert_may_block(&self) {
        let current = thread::current().id();
        debug_assert!(
            current != self.lifecycle_id,
            "synchronous lifecycle call from the lifecycle thread"
        );
        debug_assert!(
            self.shared.config.ui_thread != Some(current),
            "synchronous lifecycle call from the UI thread"
        );
        debug_assert!(
            !self
                .shared
                .card
                .lock()
                .as_ref()
                .is_some_and(SmartCardInterface::is_worker_thread),
            "synchronous lifecycle call from the command worker"
        );
    }
}

impl Drop for NfcConnection {
    fn drop(&mut self) {
        let _ = self.messages.send(Message::Shutdown);
        if let Some(handle) = self.lifecycle.take()
            && handle.join().is_err()
        {
            warn!("NFC lifecycle thread panicked");
        }
    }
}

struct Lifecycle {
    shared: Arc<Shared>,
    reader: Arc<dyn NfcReader>,
    events: NfcEvents,
}

impl Lifecycle {
    fn run(self, inbox: &Receiver<Message>) {
        for message in inbox {
            debug!(?message, state = %self.shared.state.get(), "NFC lifecycle message");
            match message {
                Message::Start(alert) => self.start(alert.as_deref()),
                Message::Stop(completion) => self.stop(completion),
                Message::Discovered(tag) => self.discovered(tag),
                Message::TagLost => self.tag_lost(),
                Message::Invalidated(reason) => self.invalidated(reason),
                Message::Shutdown => break,
            }
        }
        self.stop(NfcCompletion::Success);
    }

    fn start(&self, alert: Option<&str>) {
        if self.shared.state.get() != NfcState::Closed {
            debug!("Start ignored; reader session already active");
            return;
        }
        match self.reader.begin_session(self.events.clone(), alert) {
            Ok(()) => {
                self.shared.state.set(NfcState::Polling);
            }
            Err(e) => {
                warn!(error = %e, "Failed to begin NFC session");
                self.emit(ConnectionEvent::Failed {
                    kind: ConnectionKind::Nfc,
                    error: e.into(),
                });
            }
        }
    }

    fn stop(&self, completion: NfcCompletion) {
        let state = self.shared.state.get();
        if state == NfcState::Closed {
            return;
        }
        self.close_session();
        self.reader.invalidate(completion);
        self.shared.state.set(NfcState::Closed);
        if state == NfcState::Open {
            self.emit(ConnectionEvent::Disconnected {
                kind: ConnectionKind::Nfc,
                error: None,
            });
        }
    }

    fn discovered(&self, tag: NfcTag) {
        if self.shared.state.get() != NfcState::Polling {
            debug!("Tag ignored; not polling");
            return;
        }
        info!(uid = %hex::encode(&tag.identifier), "NFC tag discovered");

        match self.connect(&tag) {
            Ok(card) => {
                *self.shared.card.lock() = Some(card);
                *self.shared.tag.lock() = Some(tag);
                self.shared.state.set(NfcState::Open);
                self.emit(ConnectionEvent::Connected {
                    kind: ConnectionKind::Nfc,
                });
            }
            Err(error) => {
                warn!(%error, "Failed to connect to NFC tag");
                self.emit(ConnectionEvent::Failed {
                    kind: ConnectionKind::Nfc,
                    error,
                });
            }
        }
    }

    fn connect(&self, tag: &NfcTag) -> Result<SmartCardInterface, Error> {
        let policy = self.shared.config.nfc_retry;
        let attempts = policy.attempts.max(1);
        let mut attempt = 1;
        let transport = loop {
            match self.reader.connect(tag) {
                Ok(transport) => break transport,
                Err(e) if attempt < attempts => {
                    let delay = policy.backoff(attempt);
                    debug!(attempt, ?delay, error = %e, "Tag connect failed, retrying");
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        };
        SmartCardInterface::start(transport, &self.shared.config, "ykit-nfc")
    }

    fn tag_lost(&self) {
        if self.shared.state.get() != NfcState::Open {
            return;
        }
        info!("NFC tag lost");
        self.close_session();
        self.shared.state.set(NfcState::Polling);
        self.emit(ConnectionEvent::Disconnected {
            kind: ConnectionKind::Nfc,
            error: Some(Error::Disconnected),
        });
    }

    fn invalidated(&self, reason: NfcInvalidation) {
        if self.shared.state.get() == NfcState::Closed {
            return;
        }
        info!(%reason, "NFC session invalidated");
        self.close_session();
        self.shared.state.set(NfcState::Closed);
        self.emit(ConnectionEvent::Failed {
            kind: ConnectionKind::Nfc,
            error: reason.into(),
        });
    }

    fn close_session(&self) {
        let card = self.shared.card.lock().take();
        if let Some(card) = card {
            card.shutdown();
        }
        *self.shared.tag.lock() = None;
    }

    fn emit(&self, event: ConnectionEvent) {
        self.shared.events.emit(event);
    }
}
