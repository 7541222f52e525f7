//! Wired accessory connection
//!
//! A lifecycle thread owns all state changes: `start`, `stop` and the driver's
//! attach/detach notifications are messages processed in arrival order, so a
//! detach racing a stop resolves deterministically.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam_channel::{Receiver, Sender, unbounded};
use derive_more::Display;
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};
use ykit_apdu_core::prelude::*;

use crate::config::ConnectionConfig;
use crate::event::{ConnectionEvent, ConnectionKind};
use crate::observe::{EventHub, Observable};
use crate::smart_card::SmartCardInterface;

/// Lifecycle state of the accessory connection
#[derive(Debug, Display, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum AccessoryState {
    /// No session; not waiting for a key
    #[default]
    Closed,
    /// Waiting for a key to attach or for its session to open
    Opening,
    /// Session open; commands can be submitted
    Open,
    /// Session being torn down
    Closing,
}

/// Identity of an attached accessory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessoryDescription {
    /// Name the platform reports for the accessory
    pub name: String,
    /// Manufacturer string
    pub manufacturer: Option<String>,
    /// Model number
    pub model: Option<String>,
    /// Serial number
    pub serial: Option<String>,
    /// Firmware revision
    pub firmware: Option<String>,
}

impl AccessoryDescription {
    /// Description carrying only a name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

impl fmt::Display for AccessoryDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if let Some(serial) = &self.serial {
            write!(f, " ({serial})")?;
        }
        Ok(())
    }
}

/// Platform integration for wired keys
///
/// When monitoring starts the driver must report every key already attached,
/// then keep reporting attach and detach notifications until monitoring stops.
pub trait AccessoryDriver: Send + Sync + fmt::Debug {
    /// Begin delivering attach/detach notifications to `events`
    fn start_monitoring(&self, events: AccessoryEvents) -> Result<(), TransportError>;

    /// Stop delivering notifications
    fn stop_monitoring(&self);

    /// Open the byte pipe to an attached key
    fn open(&self, accessory: &AccessoryDescription)
    -> Result<Box<dyn CardTransport>, TransportError>;
}

#[derive(Debug)]
enum Message {
    Start,
    Stop,
    Attached(AccessoryDescription),
    Detached(Option<TransportError>),
    Shutdown,
}

/// Sink for driver notifications
#[derive(Debug, Clone)]
pub struct AccessoryEvents(Sender<Message>);

impl AccessoryEvents {
    /// A key was attached
    pub fn attached(&self, accessory: AccessoryDescription) {
        let _ = self.0.send(Message::Attached(accessory));
    }

    /// The key was detached
    pub fn detached(&self) {
        let _ = self.0.send(Message::Detached(None));
    }

    /// The key's pipe failed and it should be treated as detached
    pub fn failed(&self, error: TransportError) {
        let _ = self.0.send(Message::Detached(Some(error)));
    }
}

struct Shared {
    state: Observable<AccessoryState>,
    events: EventHub<ConnectionEvent>,
    card: Mutex<Option<SmartCardInterface>>,
    accessory: Mutex<Option<AccessoryDescription>>,
    config: ConnectionConfig,
}

/// Connection to a key on a wired link
pub struct AccessoryConnection {
    shared: Arc<Shared>,
    messages: Sender<Message>,
    lifecycle: Option<JoinHandle<()>>,
    lifecycle_id: ThreadId,
}

impl fmt::Debug for AccessoryConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessoryConnection")
            .field("state", &self.state())
            .field("accessory", &self.accessory())
            .finish()
    }
}

impl AccessoryConnection {
    /// Create a closed connection driven by `driver`
    pub fn new(driver: Arc<dyn AccessoryDriver>, config: ConnectionConfig) -> Result<Self, Error> {
        let shared = Arc::new(Shared {
            state: Observable::new(AccessoryState::Closed),
            events: EventHub::new(),
            card: Mutex::new(None),
            accessory: Mutex::new(None),
            config,
        });
        let (messages, inbox) = unbounded();

        let lifecycle = Lifecycle {
            shared: shared.clone(),
            driver,
            events: AccessoryEvents(messages.clone()),
            wants_open: false,
            monitoring: false,
            attached: None,
        };
        let handle = thread::Builder::new()
            .name("ykit-accessory".into())
            .spawn(move || lifecycle.run(&inbox))
            .map_err(|e| Error::message(format!("failed to spawn accessory thread: {e}")))?;

        Ok(Self {
            shared,
            messages,
            lifecycle_id: handle.thread().id(),
            lifecycle: Some(handle),
        })
    }

    /// Begin waiting for a key; opens immediately if one is attached
    ///
    /// No-op unless the connection is closed.
    pub fn start(&self) {
        let _ = self.messages.send(Message::Start);
    }

    /// Close the session and stop waiting for keys
    pub fn stop(&self) {
        let _ = self.messages.send(Message::Stop);
    }

    /// Start and wait until a session is open
    ///
    /// Returns `false` if no session opened within the configured sync
    /// timeout. Must not be called from the UI thread or this connection's
    /// own threads.
    pub fn start_synchronous(&self) -> bool {
        self.assert_may_block();
        self.start();
        self.shared
            .state
            .wait_for(self.shared.config.sync_timeout, |s| *s == AccessoryState::Open)
    }

    /// Stop and wait until the connection is closed
    pub fn stop_synchronous(&self) -> bool {
        self.assert_may_block();
        self.stop();
        self.shared
            .state
            .wait_for(self.shared.config.sync_timeout, |s| *s == AccessoryState::Closed)
    }

    /// Current lifecycle state
    pub fn state(&self) -> AccessoryState {
        self.shared.state.get()
    }

    /// Receive every future state change
    pub fn subscribe_state(&self) -> Receiver<AccessoryState> {
        self.shared.state.subscribe()
    }

    /// Receive connection events
    pub fn events(&self) -> Receiver<ConnectionEvent> {
        self.shared.events.subscribe()
    }

    pub(crate) fn forward_events(&self, sender: Sender<ConnectionEvent>) {
        self.shared.events.forward_to(sender);
    }

    /// Key the session is open with
    pub fn accessory(&self) -> Option<AccessoryDescription> {
        self.shared.accessory.lock().clone()
    }

    /// Engine for the open session
    pub fn smart_card(&self) -> Result<SmartCardInterface, Error> {
        if self.state() != AccessoryState::Open {
            return Err(Error::NotConnected);
        }
        self.shared.card.lock().clone().ok_or(Error::NotConnected)
    }

    /// Cancel queued commands on the open session
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

impl Drop for AccessoryConnection {
    fn drop(&mut self) {
        let _ = self.messages.send(Message::Shutdown);
        if let Some(handle) = self.lifecycle.take()
            && handle.join().is_err()
        {
            warn!("Accessory lifecycle thread panicked");
        }
    }
}

struct Lifecycle {
    shared: Arc<Shared>,
    driver: Arc<dyn AccessoryDriver>,
    events: AccessoryEvents,
    wants_open: bool,
    monitoring: bool,
    attached: Option<AccessoryDescription>,
}

impl Lifecycle {
    fn run(mut self, inbox: &Receiver<Message>) {
        for message in inbox {
            debug!(?message, state = %self.shared.state.get(), "Accessory lifecycle message");
            match message {
                Message::Start => self.start(),
                Message::Stop => self.stop(),
                Message::Attached(accessory) => self.attached(accessory),
                Message::Detached(reason) => self.detached(reason),
                Message::Shutdown => break,
            }
        }
        self.stop();
    }

    fn start(&mut self) {
        if self.shared.state.get() != AccessoryState::Closed {
            debug!("Start ignored; connection already active");
            return;
        }
        self.wants_open = true;
        self.shared.state.set(AccessoryState::Opening);

        if !self.monitoring {
            if let Err(e) = self.driver.start_monitoring(self.events.clone()) {
                warn!(error = %e, "Failed to start accessory monitoring");
                self.wants_open = false;
                self.shared.state.set(AccessoryState::Closed);
                self.emit(ConnectionEvent::Failed {
                    kind: ConnectionKind::Accessory,
                    error: e.into(),
                });
                return;
            }
            self.monitoring = true;
        }

        if let Some(accessory) = self.attached.clone() {
            self.open(accessory);
        }
    }

    fn stop(&mut self) {
        self.wants_open = false;
        let state = self.shared.state.get();
        if state == AccessoryState::Open {
            self.shared.state.set(AccessoryState::Closing);
            self.close_session();
        }
        if self.monitoring {
            self.driver.stop_monitoring();
            self.monitoring = false;
            self.attached = None;
        }
        self.shared.state.set(AccessoryState::Closed);
        if state == AccessoryState::Open {
            self.emit(ConnectionEvent::Disconnected {
                kind: ConnectionKind::Accessory,
                error: None,
            });
        }
    }

    fn attached(&mut self, accessory: AccessoryDescription) {
        info!(%accessory, "Accessory attached");
        self.attached = Some(accessory.clone());
        if self.shared.state.get() == AccessoryState::Opening {
            self.open(accessory);
        }
    }

    fn detached(&mut self, reason: Option<TransportError>) {
        info!(reason = ?reason, "Accessory detached");
        self.attached = None;
        if self.shared.state.get() == AccessoryState::Closed {
            return;
        }

        let was_open = self.shared.state.get() == AccessoryState::Open;
        self.close_session();
        self.shared.state.set(AccessoryState::Closed);
        if was_open {
            let error = reason.map_or(Error::Disconnected, Error::from);
            self.emit(ConnectionEvent::Disconnected {
                kind: ConnectionKind::Accessory,
                error: Some(error),
            });
        }
        if self.wants_open {
            self.shared.state.set(AccessoryState::Opening);
        }
    }

    #[instrument(skip(self), fields(accessory = %accessory))]
    fn open(&mut self, accessory: AccessoryDescription) {
        let result = self.driver.open(&accessory).map_err(Error::from).and_then(|transport| {
            SmartCardInterface::start(transport, &self.shared.config, "ykit-accessory")
        });
        match result {
            Ok(card) => {
                *self.shared.card.lock() = Some(card);
                *self.shared.accessory.lock() = Some(accessory);
                self.shared.state.set(AccessoryState::Open);
                info!("Accessory session open");
                self.emit(ConnectionEvent::Connected {
                    kind: ConnectionKind::Accessory,
                });
            }
            Err(error) => {
                warn!(%error, "Failed to open accessory session");
                self.emit(ConnectionEvent::Failed {
                    kind: ConnectionKind::Accessory,
                    error,
                });
            }
        }
    }

    fn close_session(&self) {
        let card = self.shared.card.lock().take();
        if let Some(card) = card {
            card.shutdown();
        }
        *self.shared.accessory.lock() = None;
    }

    fn emit(&self, event: ConnectionEvent) {
        self.shared.events.emit(event);
    }
}
