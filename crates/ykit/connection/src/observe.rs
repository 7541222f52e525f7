//! Observable state and event fan-out
//!
//! Subscribers receive a crossbeam channel. Disconnected subscribers are pruned
//! on the next publish.

use std::fmt;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::{Condvar, Mutex};
use tracing::trace;

/// A value whose changes are published to subscribers
pub struct Observable<S> {
    inner: Mutex<ObservableInner<S>>,
    changed: Condvar,
}

struct ObservableInner<S> {
    value: S,
    subscribers: Vec<Sender<S>>,
}

impl<S: fmt::Debug> fmt::Debug for Observable<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable")
            .field("value", &self.inner.lock().value)
            .finish()
    }
}

impl<S: Clone + PartialEq + fmt::Debug> Observable<S> {
    /// Observable starting at `value`
    pub fn new(value: S) -> Self {
        Self {
            inner: Mutex::new(ObservableInner {
                value,
                subscribers: Vec::new(),
            }),
            changed: Condvar::new(),
        }
    }

    /// Current value
    pub fn get(&self) -> S {
        self.inner.lock().value.clone()
    }

    /// Replace the value, publishing it if it changed
    ///
    /// Returns whether the value changed.
    pub fn set(&self, value: S) -> bool {
        let mut inner = self.inner.lock();
        self.publish(&mut inner, value)
    }

    /// Move to `to` only if the current value is `from`
    pub fn transition(&self, from: &S, to: S) -> bool {
        let mut inner = self.inner.lock();
        if inner.value != *from {
            return false;
        }
        self.publish(&mut inner, to)
    }

    fn publish(&self, inner: &mut ObservableInner<S>, value: S) -> bool {
        if inner.value == value {
            return false;
        }
        trace!(from = ?inner.value, to = ?value, "State change");
        inner.value = value.clone();
        inner.subscribers.retain(|tx| tx.send(value.clone()).is_ok());
        self.changed.notify_all();
        true
    }

    /// Receive every future value
    pub fn subscribe(&self) -> Receiver<S> {
        let (tx, rx) = unbounded();
        self.inner.lock().subscribers.push(tx);
        rx
    }

    /// Block until `predicate` holds or `timeout` elapses
    ///
    /// Returns whether the predicate held.
    pub fn wait_for(&self, timeout: Duration, predicate: impl Fn(&S) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        while !predicate(&inner.value) {
            if self.changed.wait_until(&mut inner, deadline).timed_out() {
                return predicate(&inner.value);
            }
        }
        true
    }
}

/// Broadcasts events to every listener
pub struct EventHub<E> {
    listeners: Mutex<Vec<Sender<E>>>,
}

impl<E> fmt::Debug for EventHub<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHub")
            .field("listeners", &self.listeners.lock().len())
            .finish()
    }
}

impl<E> Default for EventHub<E> {
    fn default() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }
}

impl<E: Clone> EventHub<E> {
    /// New hub without listeners
    pub fn new() -> Self {
        Self::default()
    }

    /// New listener channel
    pub fn subscribe(&self) -> Receiver<E> {
        let (tx, rx) = unbounded();
        self.listeners.lock().push(tx);
        rx
    }

    /// Forward events into an existing channel
    pub fn forward_to(&self, sender: Sender<E>) {
        self.listeners.lock().push(sender);
    }

    /// Send `event` to every live listener
    pub fn emit(&self, event: E) {
        self.listeners
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}
