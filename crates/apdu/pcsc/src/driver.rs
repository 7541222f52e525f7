//! Accessory driver backed by the PC/SC reader monitor
//!
//! A monitor thread waits on `SCardGetStatusChange` and reports the first
//! reader holding an acceptable card as the attached accessory. When that card
//! leaves, or is swapped for another, the accessory is reported detached.

use std::ffi::CString;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use pcsc::{Context, ReaderState, Scope, State};
use tracing::{debug, info, trace, warn};
use ykit_apdu_core::transport::{CardTransport, TransportError};
use ykit_connection::{AccessoryDescription, AccessoryDriver, AccessoryEvents};

use crate::config::PcscConfig;
use crate::error::PcscError;
use crate::reader::PcscReader;
use crate::transport::PcscTransport;

/// Change the monitor reports to the connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Change {
    Attached(AccessoryDescription),
    Detached,
}

/// Decides which reader is the attached accessory
#[derive(Debug, Default)]
pub(crate) struct Tracker {
    /// Reader and ATR of the card reported attached
    attached: Option<(String, Vec<u8>)>,
}

impl Tracker {
    pub(crate) fn update(&mut self, readers: &[PcscReader], config: &PcscConfig) -> Option<Change> {
        if let Some((name, atr)) = &self.attached {
            let still_there = readers
                .iter()
                .any(|r| r.name() == name && r.atr() == Some(atr.as_slice()));
            if still_there {
                return None;
            }
            self.attached = None;
            return Some(Change::Detached);
        }

        let reader = readers.iter().find(|r| {
            config.accepts_reader(r.name()) && r.atr().is_some_and(|atr| config.accepts_atr(atr))
        })?;
        let atr = reader.atr().map(<[u8]>::to_vec).unwrap_or_default();
        let description = AccessoryDescription {
            model: Some(hex::encode_upper(&atr)),
            ..AccessoryDescription::named(reader.name())
        };
        self.attached = Some((reader.name().to_owned(), atr));
        Some(Change::Attached(description))
    }
}

#[derive(Debug)]
struct Monitor {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// [`AccessoryDriver`] for keys in PC/SC readers
pub struct PcscDriver {
    context: Context,
    config: PcscConfig,
    monitor: Mutex<Option<Monitor>>,
}

impl fmt::Debug for PcscDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcscDriver")
            .field("config", &self.config)
            .field("monitoring", &self.monitor.lock().is_some())
            .finish()
    }
}

/// Readers currently known to PC/SC
pub fn list_readers(context: &Context) -> Result<Vec<PcscReader>, PcscError> {
    let names = match context.list_readers_owned() {
        Ok(names) => names,
        Err(pcsc::Error::NoReadersAvailable) => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut states: Vec<ReaderState> = names
        .into_iter()
        .map(|name| ReaderState::new(name, State::UNAWARE))
        .collect();
    if !states.is_empty() {
        context.get_status_change(Some(std::time::Duration::ZERO), &mut states)?;
    }
    Ok(states.iter().map(PcscReader::from_reader_state).collect())
}

impl PcscDriver {
    /// Driver with its own PC/SC context
    pub fn new(config: PcscConfig) -> Result<Self, PcscError> {
        let context = Context::establish(Scope::User)?;
        Ok(Self {
            context,
            config,
            monitor: Mutex::new(None),
        })
    }

    /// Readers currently known to PC/SC
    pub fn readers(&self) -> Result<Vec<PcscReader>, PcscError> {
        list_readers(&self.context)
    }

    /// Driver configuration
    pub const fn config(&self) -> &PcscConfig {
        &self.config
    }
}

/// Keep `states` in step with the reader list, preserving known states
fn refresh_states(context: &Context, states: &mut Vec<ReaderState>) {
    let names = match context.list_readers_owned() {
        Ok(names) => names,
        Err(pcsc::Error::NoReadersAvailable) => Vec::new(),
        Err(e) => {
            debug!(error = %e, "Listing readers failed");
            return;
        }
    };
    states.retain(|rs| is_pnp(rs) || names.iter().any(|n| n.as_c_str() == rs.name()));
    for name in names {
        if !states.iter().any(|rs| rs.name() == name.as_c_str()) {
            trace!(reader = %name.to_string_lossy(), "Reader appeared");
            states.push(ReaderState::new(name, State::UNAWARE));
        }
    }
}

fn is_pnp(state: &ReaderState) -> bool {
    state.name() == pcsc::PNP_NOTIFICATION()
}

fn monitor(context: &Context, config: &PcscConfig, events: &AccessoryEvents, running: &AtomicBool) {
    let mut states =
        vec![ReaderState::new(CString::from(pcsc::PNP_NOTIFICATION()), State::UNAWARE)];
    let mut tracker = Tracker::default();

    while running.load(Ordering::Acquire) {
        refresh_states(context, &mut states);
        for rs in &mut states {
            rs.sync_current_state();
        }
        match context.get_status_change(Some(config.poll_interval), &mut states) {
            Ok(()) | Err(pcsc::Error::Timeout) => {}
            Err(pcsc::Error::Cancelled) => break,
            Err(e) => {
                warn!(error = %e, "Waiting for reader changes failed");
                thread::sleep(config.poll_interval);
                continue;
            }
        }

        let readers: Vec<PcscReader> = states
            .iter()
            .filter(|rs| !is_pnp(rs))
            .map(PcscReader::from_reader_state)
            .collect();
        match tracker.update(&readers, config) {
            Some(Change::Attached(accessory)) => {
                info!(reader = %accessory.name, "Key attached");
                events.attached(accessory);
            }
            Some(Change::Detached) => {
                info!("Key detached");
                events.detached();
            }
            None => {}
        }
    }
    debug!("PC/SC monitor stopped");
}

impl AccessoryDriver for PcscDriver {
    fn start_monitoring(&self, events: AccessoryEvents) -> Result<(), TransportError> {
        let mut slot = self.monitor.lock();
        if slot.is_some() {
            return Ok(());
        }
        let running = Arc::new(AtomicBool::new(true));
        let context = self.context.clone();
        let config = self.config.clone();
        let flag = running.clone();
        let handle = thread::Builder::new()
            .name("ykit-pcsc-monitor".into())
            .spawn(move || monitor(&context, &config, &events, &flag))
            .map_err(|e| TransportError::other(e.to_string()))?;
        *slot = Some(Monitor { running, handle });
        debug!("PC/SC monitor started");
        Ok(())
    }

    fn stop_monitoring(&self) {
        let Some(monitor) = self.monitor.lock().take() else {
            return;
        };
        monitor.running.store(false, Ordering::Release);
        if let Err(e) = self.context.cancel() {
            debug!(error = %e, "Cancelling the status wait failed");
        }
        if monitor.handle.join().is_err() {
            warn!("PC/SC monitor thread panicked");
        }
    }

    fn open(
        &self,
        accessory: &AccessoryDescription,
    ) -> Result<Box<dyn CardTransport>, TransportError> {
        let transport =
            PcscTransport::connect(self.context.clone(), &accessory.name, self.config.clone())?;
        Ok(Box::new(transport))
    }
}

impl Drop for PcscDriver {
    fn drop(&mut self) {
        self.stop_monitoring();
    }
}
