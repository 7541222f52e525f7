//! Completion handles for queued work
//!
//! Every submission returns a [`Pending`] that the caller may block on, poll,
//! or attach a callback to. The worker owns the matching [`Completer`] and
//! fulfils it exactly once; dropping an unfulfilled completer resolves the
//! handle with [`Error::ConnectionClosed`] so no caller waits forever.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use ykit_apdu_core::Error;

type Callback<T, E> = Box<dyn FnOnce(Result<T, E>) + Send>;

enum Slot<T, E> {
    Waiting(Option<Callback<T, E>>),
    Ready(Result<T, E>),
    Taken,
}

struct Shared<T, E> {
    slot: Mutex<Slot<T, E>>,
    ready: Condvar,
}

/// Handle on the result of a queued command or task
pub struct Pending<T, E = Error> {
    shared: Arc<Shared<T, E>>,
    ticket: u64,
}

/// Producer side of a [`Pending`]
pub(crate) struct Completer<T, E: From<Error> = Error> {
    shared: Option<Arc<Shared<T, E>>>,
}

impl<T, E> fmt::Debug for Pending<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pending")
            .field("ticket", &self.ticket)
            .field("complete", &self.is_complete())
            .finish()
    }
}

impl<T, E: From<Error>> Pending<T, E> {
    pub(crate) fn channel(ticket: u64) -> (Self, Completer<T, E>) {
        let shared = Arc::new(Shared {
            slot: Mutex::new(Slot::Waiting(None)),
            ready: Condvar::new(),
        });
        let completer = Completer {
            shared: Some(shared.clone()),
        };
        (Self { shared, ticket }, completer)
    }

    /// Handle that is already resolved
    pub fn ready(result: Result<T, E>) -> Self {
        Self {
            shared: Arc::new(Shared {
                slot: Mutex::new(Slot::Ready(result)),
                ready: Condvar::new(),
            }),
            ticket: 0,
        }
    }
}

impl<T, E> Pending<T, E> {
    /// Position assigned when the entry was enqueued
    ///
    /// Tickets increase strictly in submission order; entries run in ticket
    /// order. Handles that never reached a queue carry ticket `0`.
    pub const fn ticket(&self) -> u64 {
        self.ticket
    }

    /// Whether the result is available
    pub fn is_complete(&self) -> bool {
        !matches!(*self.shared.slot.lock(), Slot::Waiting(_))
    }

    /// Block until the result is available
    pub fn wait(self) -> Result<T, E> {
        let mut slot = self.shared.slot.lock();
        loop {
            match std::mem::replace(&mut *slot, Slot::Taken) {
                Slot::Ready(result) => return result,
                waiting @ Slot::Waiting(_) => {
                    *slot = waiting;
                    self.shared.ready.wait(&mut slot);
                }
                Slot::Taken => unreachable!("pending result taken twice"),
            }
        }
    }

    /// Block for at most `timeout`, handing the handle back if it is still pending
    pub fn wait_timeout(self, timeout: Duration) -> Result<Result<T, E>, Self> {
        let deadline = Instant::now() + timeout;
        {
            let mut slot = self.shared.slot.lock();
            loop {
                match std::mem::replace(&mut *slot, Slot::Taken) {
                    Slot::Ready(result) => return Ok(result),
                    waiting @ Slot::Waiting(_) => {
                        *slot = waiting;
                        if self.shared.ready.wait_until(&mut slot, deadline).timed_out() {
                            break;
                        }
                    }
                    Slot::Taken => unreachable!("pending result taken twice"),
                }
            }
        }
        Err(self)
    }

    /// Take the result if it is available, handing the handle back otherwise
    pub fn try_wait(self) -> Result<Result<T, E>, Self> {
        {
            let mut slot = self.shared.slot.lock();
            if matches!(*slot, Slot::Ready(_))
                && let Slot::Ready(result) = std::mem::replace(&mut *slot, Slot::Taken)
            {
                return Ok(result);
            }
        }
        Err(self)
    }

    /// Run `callback` with the result
    ///
    /// The callback runs on the worker thread when it completes the entry, or
    /// immediately on the calling thread if the result is already available.
    pub fn on_complete(self, callback: impl FnOnce(Result<T, E>) + Send + 'static) {
        let mut slot = self.shared.slot.lock();
        match std::mem::replace(&mut *slot, Slot::Taken) {
            Slot::Ready(result) => {
                drop(slot);
                callback(result);
            }
            Slot::Waiting(_) => *slot = Slot::Waiting(Some(Box::new(callback))),
            Slot::Taken => {}
        }
    }

    /// Convert the result once it arrives
    ///
    /// The conversion runs on the completing thread.
    pub fn map<U, F>(self, f: F) -> Pending<U, E>
    where
        T: Send + 'static,
        E: From<Error> + Send + 'static,
        U: Send + 'static,
        F: FnOnce(Result<T, E>) -> Result<U, E> + Send + 'static,
    {
        let (pending, completer) = Pending::channel(self.ticket);
        self.on_complete(move |result| completer.complete(f(result)));
        pending
    }
}

impl<T, E: From<Error>> Completer<T, E> {
    /// Fulfil the handle, waking waiters and running an attached callback
    pub(crate) fn complete(mut self, result: Result<T, E>) {
        if let Some(shared) = self.shared.take() {
            Self::fulfil(&shared, result);
        }
    }

    fn fulfil(shared: &Shared<T, E>, result: Result<T, E>) {
        let mut slot = shared.slot.lock();
        match std::mem::replace(&mut *slot, Slot::Taken) {
            Slot::Waiting(Some(callback)) => {
                drop(slot);
                callback(result);
            }
            Slot::Waiting(None) => {
                *slot = Slot::Ready(result);
                shared.ready.notify_all();
            }
            finished => *slot = finished,
        }
    }
}

impl<T, E: From<Error>> Drop for Completer<T, E> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            Self::fulfil(&shared, Err(Error::ConnectionClosed.into()));
        }
    }
}

/// Cooperative cancellation flag
///
/// The worker checks the token before an entry starts and before every
/// exchange inside a task. An exchange already on the wire always finishes.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// New, uncancelled token
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
