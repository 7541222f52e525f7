//! Serial command engine for an open connection
//!
//! Every command, select and multi-APDU task goes through one FIFO queue that a
//! single worker thread drains. The worker owns the card: entries run one after
//! another in submission order and at most one exchange is ever on the link.

mod channel;
mod link;
mod queue;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use bytes::Bytes;
pub use channel::CardChannel;
use channel::Selection;
use link::IoLink;
use parking_lot::Mutex;
use queue::{CommandQueue, TaskEntry, Work};
use tracing::{debug, error, trace, warn};
use ykit_apdu_core::prelude::*;

use crate::config::ConnectionConfig;
use crate::pending::{CancellationToken, Pending};

/// Per-submission options
#[derive(Debug, Clone, Default)]
pub struct CommandOptions {
    /// Watchdog for the whole entry; the connection default when `None`
    pub timeout: Option<Duration>,
    /// Continuation instruction used for `61XX`
    pub send_remaining: SendRemaining,
    /// Token that cancels the entry before it starts
    pub token: Option<CancellationToken>,
}

impl CommandOptions {
    /// Default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the entry timeout
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the continuation instruction
    pub const fn with_send_remaining(mut self, send_remaining: SendRemaining) -> Self {
        self.send_remaining = send_remaining;
        self
    }

    /// Attach a cancellation token
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }
}

struct Inner {
    queue: Arc<CommandQueue>,
    command_timeout: Duration,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
}

/// Handle for submitting work to an open connection
///
/// Cheap to clone; all clones share the queue. Once the connection closes every
/// submission resolves immediately with [`Error::ConnectionClosed`].
#[derive(Clone)]
pub struct SmartCardInterface {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SmartCardInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmartCardInterface")
            .field("queued", &self.inner.queue.len())
            .field("closed", &self.inner.queue.is_closed())
            .finish()
    }
}

impl SmartCardInterface {
    /// Start the worker and I/O threads for `transport`
    pub fn start(
        transport: Box<dyn CardTransport>,
        config: &ConnectionConfig,
        name: &str,
    ) -> Result<Self, Error> {
        let link = IoLink::spawn(transport, name)?;
        let queue = Arc::new(CommandQueue::default());
        let worker_queue = queue.clone();
        let max_chains = config.max_chains;

        let worker = thread::Builder::new()
            .name(format!("{name}-worker"))
            .spawn(move || run_worker(&worker_queue, link, max_chains))
            .map_err(|e| Error::message(format!("failed to spawn worker thread: {e}")))?;
        let worker_id = worker.thread().id();
        debug!(name, "Command engine started");

        Ok(Self {
            inner: Arc::new(Inner {
                queue,
                command_timeout: config.command_timeout,
                worker: Mutex::new(Some(worker)),
                worker_id,
            }),
        })
    }

    /// Queue `task` for exclusive use of the card
    ///
    /// The closure runs on the worker thread once every earlier entry has
    /// finished. All exchanges it makes share one deadline.
    pub fn submit<T, E, F>(&self, options: CommandOptions, task: F) -> Pending<T, E>
    where
        T: Send + 'static,
        E: From<Error> + Send + 'static,
        F: FnOnce(&mut CardChannel<'_>) -> Result<T, E> + Send + 'static,
    {
        let timeout = options.timeout.unwrap_or(self.inner.command_timeout);
        let token = options.token.unwrap_or_default();
        let pending = self.inner.queue.push_with(|ticket| {
            let (pending, completer) = Pending::channel(ticket);
            let work = Work::Task {
                task: Box::new(TaskEntry { task, completer }),
                timeout,
                token,
            };
            (work, pending)
        });
        pending.unwrap_or_else(|| Pending::ready(Err(Error::ConnectionClosed.into())))
    }

    /// Send one command and return its assembled response payload
    pub fn execute(&self, command: impl ApduCommand) -> Pending<Bytes> {
        self.execute_with(command, CommandOptions::default())
    }

    /// Send one command with explicit options
    pub fn execute_with(
        &self,
        command: impl ApduCommand,
        options: CommandOptions,
    ) -> Pending<Bytes> {
        let command = command.to_command();
        let send_remaining = options.send_remaining;
        self.submit(options, move |channel| {
            channel.transmit_with(&command, send_remaining)
        })
    }

    /// Select `application`; a no-op round trip when it is already selected
    pub fn select_application(&self, application: Application) -> Pending<Bytes> {
        self.submit(CommandOptions::default(), move |channel| {
            channel.select(application)
        })
    }

    /// Run `block` once every entry queued so far has finished
    ///
    /// Barriers are never cancelled. On a closed connection the block runs
    /// immediately on the calling thread.
    pub fn dispatch_after_current_commands(&self, block: impl FnOnce() + Send + 'static) {
        if let Err(work) = self.inner.queue.push(Work::Barrier(Box::new(block))) {
            work.abort(Error::ConnectionClosed);
        }
    }

    /// Resolve every queued, not yet started entry with [`Error::Cancelled`]
    ///
    /// The entry currently executing finishes normally. Returns the number of
    /// entries cancelled.
    pub fn cancel_commands(&self) -> usize {
        let drained = self.inner.queue.drain_tasks();
        let count = drained.len();
        for entry in drained {
            trace!(ticket = entry.ticket, "Cancelling queued entry");
            entry.work.abort(Error::Cancelled);
        }
        if count > 0 {
            debug!(count, "Cancelled queued commands");
        }
        count
    }

    /// Whether submissions are still accepted
    pub fn is_open(&self) -> bool {
        !self.inner.queue.is_closed()
    }

    /// Whether the caller is running on this connection's worker thread
    pub fn is_worker_thread(&self) -> bool {
        thread::current().id() == self.inner.worker_id
    }

    /// Stop accepting work and wait for the worker to finish
    ///
    /// Queued entries resolve with [`Error::ConnectionClosed`]; the entry
    /// executing finishes first. Idempotent.
    pub fn shutdown(&self) {
        let aborted = self.inner.queue.close();
        if !aborted.is_empty() {
            debug!(count = aborted.len(), "Closing with queued commands");
        }
        for entry in aborted {
            entry.work.abort(Error::ConnectionClosed);
        }

        let worker = self.inner.worker.lock().take();
        if let Some(worker) = worker {
            if self.is_worker_thread() {
                return;
            }
            if worker.join().is_err() {
                error!("Worker thread panicked");
            }
        }
    }
}

fn run_worker(queue: &CommandQueue, mut link: IoLink, max_chains: usize) {
    let mut selection = Selection::default();

    while let Some(entry) = queue.next() {
        match entry.work {
            Work::Barrier(block) => {
                trace!(ticket = entry.ticket, "Running barrier");
                block();
            }
            Work::Task {
                task,
                timeout,
                token,
            } => {
                if token.is_cancelled() {
                    task.abort(Error::Cancelled);
                    continue;
                }
                trace!(ticket = entry.ticket, ?timeout, "Executing entry");
                let mut channel = CardChannel {
                    link: &mut link,
                    selection: &mut selection,
                    deadline: Instant::now() + timeout,
                    token: &token,
                    max_chains,
                };
                if catch_unwind(AssertUnwindSafe(|| task.run(&mut channel))).is_err() {
                    warn!(ticket = entry.ticket, "Queued task panicked");
                }
            }
        }
    }
    debug!("Command engine stopped");
}
