//! FIFO of work waiting for the worker thread

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use ykit_apdu_core::Error;

use super::channel::CardChannel;
use crate::pending::{CancellationToken, Completer};

/// Unit of work executed on the worker with exclusive access to the card
pub(crate) trait QueuedTask: Send {
    fn run(self: Box<Self>, channel: &mut CardChannel<'_>);

    fn abort(self: Box<Self>, error: Error);
}

/// Closure over the card channel paired with the completer for its result
pub(crate) struct TaskEntry<T, E: From<Error>, F> {
    pub(crate) task: F,
    pub(crate) completer: Completer<T, E>,
}

impl<T, E, F> QueuedTask for TaskEntry<T, E, F>
where
    T: Send,
    E: From<Error> + Send,
    F: FnOnce(&mut CardChannel<'_>) -> Result<T, E> + Send,
{
    fn run(self: Box<Self>, channel: &mut CardChannel<'_>) {
        let Self { task, completer } = *self;
        completer.complete(task(channel));
    }

    fn abort(self: Box<Self>, error: Error) {
        self.completer.complete(Err(error.into()));
    }
}

pub(crate) enum Work {
    Task {
        task: Box<dyn QueuedTask>,
        timeout: Duration,
        token: CancellationToken,
    },
    Barrier(Box<dyn FnOnce() + Send>),
}

impl Work {
    /// Resolve the entry without running it
    ///
    /// Barriers always run; they only wait for the work ahead of them.
    pub(crate) fn abort(self, error: Error) {
        match self {
            Self::Task { task, .. } => task.abort(error),
            Self::Barrier(block) => block(),
        }
    }
}

pub(crate) struct Entry {
    pub(crate) ticket: u64,
    pub(crate) work: Work,
}

#[derive(Default)]
struct QueueState {
    entries: VecDeque<Entry>,
    next_ticket: u64,
    closed: bool,
}

/// Queue shared between submitters and the worker
#[derive(Default)]
pub(crate) struct CommandQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl CommandQueue {
    /// Append `work`, returning its ticket
    ///
    /// Hands the work back when the queue is closed.
    pub(crate) fn push(&self, work: Work) -> Result<u64, Work> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(work);
        }
        state.next_ticket += 1;
        let ticket = state.next_ticket;
        state.entries.push_back(Entry { ticket, work });
        self.available.notify_one();
        Ok(ticket)
    }

    /// Append work built from its ticket
    ///
    /// `build` runs under the queue lock so the ticket it sees is the position
    /// the entry takes.
    pub(crate) fn push_with<R>(&self, build: impl FnOnce(u64) -> (Work, R)) -> Option<R> {
        let mut state = self.state.lock();
        if state.closed {
            return None;
        }
        state.next_ticket += 1;
        let ticket = state.next_ticket;
        let (work, extra) = build(ticket);
        state.entries.push_back(Entry { ticket, work });
        self.available.notify_one();
        Some(extra)
    }

    /// Block until an entry is available; `None` once closed and empty
    pub(crate) fn next(&self) -> Option<Entry> {
        let mut state = self.state.lock();
        loop {
            if let Some(entry) = state.entries.pop_front() {
                return Some(entry);
            }
            if state.closed {
                return None;
            }
            self.available.wait(&mut state);
        }
    }

    /// Remove every queued task, leaving barriers in place
    pub(crate) fn drain_tasks(&self) -> Vec<Entry> {
        Self::take_tasks(&mut self.state.lock())
    }

    /// Refuse further submissions
    ///
    /// Returns queued tasks; barriers stay for the worker to run.
    pub(crate) fn close(&self) -> Vec<Entry> {
        let mut state = self.state.lock();
        state.closed = true;
        self.available.notify_all();
        Self::take_tasks(&mut state)
    }

    fn take_tasks(state: &mut QueueState) -> Vec<Entry> {
        let (tasks, kept): (VecDeque<_>, VecDeque<_>) = state
            .entries
            .drain(..)
            .partition(|entry| matches!(entry.work, Work::Task { .. }));
        state.entries = kept;
        tasks.into()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().entries.len()
    }
}
