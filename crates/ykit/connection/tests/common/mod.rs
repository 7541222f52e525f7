//! Fake platform drivers shared by the integration tests

#![allow(dead_code, unreachable_pub)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use ykit_apdu_core::Bytes;
use ykit_apdu_core::transport::mock::MockTransport;
use ykit_apdu_core::transport::{CardTransport, TransportError};
use ykit_connection::{
    AccessoryDescription, AccessoryDriver, AccessoryEvents, ConnectionConfig, NfcCompletion,
    NfcEvents, NfcReader, NfcRetryPolicy, NfcTag,
};

pub const WAIT: Duration = Duration::from_secs(2);

pub fn config() -> ConnectionConfig {
    ConnectionConfig::new()
        .with_sync_timeout(WAIT)
        .with_nfc_retry(NfcRetryPolicy {
            attempts: 3,
            initial_backoff: Duration::from_millis(1),
            multiplier: 2,
            max_backoff: Duration::from_millis(5),
        })
}

/// Transport that answers every command with `90 00`
pub fn ok_transport() -> Box<dyn CardTransport> {
    Box::new(MockTransport::with_handler(|_| {
        Ok(Bytes::from_static(&[0x90, 0x00]))
    }))
}

/// Next value from `rx`, failing the test after [`WAIT`]
pub fn next<T>(rx: &Receiver<T>) -> T {
    rx.recv_timeout(WAIT).expect("timed out waiting for value")
}

#[derive(Debug, Default)]
pub struct FakeDriver {
    events: Mutex<Option<AccessoryEvents>>,
    attached: AtomicBool,
    pub fail_open: AtomicBool,
    pub opened: AtomicUsize,
    pub monitoring: AtomicBool,
}

impl FakeDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn description() -> AccessoryDescription {
        AccessoryDescription {
            serial: Some("12345678".into()),
            ..AccessoryDescription::named("YubiKey 5Ci")
        }
    }

    pub fn attach(&self) {
        let events = self.events.lock();
        self.attached.store(true, Ordering::SeqCst);
        if let Some(events) = events.as_ref() {
            events.attached(Self::description());
        }
    }

    pub fn detach(&self) {
        let events = self.events.lock();
        self.attached.store(false, Ordering::SeqCst);
        if let Some(events) = events.as_ref() {
            events.detached();
        }
    }
}

impl AccessoryDriver for FakeDriver {
    fn start_monitoring(&self, events: AccessoryEvents) -> Result<(), TransportError> {
        let mut current = self.events.lock();
        if self.attached.load(Ordering::SeqCst) {
            events.attached(Self::description());
        }
        *current = Some(events);
        self.monitoring.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop_monitoring(&self) {
        self.events.lock().take();
        self.monitoring.store(false, Ordering::SeqCst);
    }

    fn open(&self, _: &AccessoryDescription) -> Result<Box<dyn CardTransport>, TransportError> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(TransportError::Connection);
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(ok_transport())
    }
}

#[derive(Debug, Default)]
pub struct FakeReader {
    events: Mutex<Option<NfcEvents>>,
    pub fail_begin: AtomicBool,
    /// Number of connect attempts to fail before succeeding
    pub connect_failures: AtomicUsize,
    pub connect_attempts: AtomicUsize,
    pub alerts: Mutex<Vec<String>>,
    pub completions: Mutex<Vec<NfcCompletion>>,
}

impl FakeReader {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn tag() -> NfcTag {
        NfcTag {
            identifier: vec![0x04, 0xA2, 0x19, 0x7C],
            historical_bytes: None,
        }
    }

    pub fn events(&self) -> NfcEvents {
        self.events
            .lock()
            .clone()
            .expect("reader session not started")
    }
}

impl NfcReader for FakeReader {
    fn begin_session(&self, events: NfcEvents, alert: Option<&str>) -> Result<(), TransportError> {
        if self.fail_begin.load(Ordering::SeqCst) {
            return Err(TransportError::other("NFC unavailable"));
        }
        if let Some(alert) = alert {
            self.alerts.lock().push(alert.to_owned());
        }
        *self.events.lock() = Some(events);
        Ok(())
    }

    fn set_alert_message(&self, message: &str) {
        self.alerts.lock().push(message.to_owned());
    }

    fn connect(&self, _: &NfcTag) -> Result<Box<dyn CardTransport>, TransportError> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.connect_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.connect_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(TransportError::Connection);
        }
        Ok(ok_transport())
    }

    fn invalidate(&self, completion: NfcCompletion) {
        self.completions.lock().push(completion);
    }
}
