//! Application sessions bound to a selection
//!
//! A session is opened by selecting its application. Selecting any other
//! application afterwards, through another session or a raw SELECT, ends it:
//! further calls fail with [`Error::SessionInvalidated`] until the session
//! selects its application again.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use ykit_apdu_core::{Application, Command, Error};

use crate::pending::Pending;
use crate::smart_card::{CardChannel, CommandOptions, SmartCardInterface};

/// Proof that an application was selected at a given point in the selection history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionToken {
    application: Application,
    epoch: u64,
}

impl SessionToken {
    pub(crate) const fn new(application: Application, epoch: u64) -> Self {
        Self { application, epoch }
    }

    /// Application the session was opened for
    pub const fn application(&self) -> Application {
        self.application
    }

    /// Selection counter value when the application was selected
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }
}

/// Shared, updatable token held by a session and its clones
#[derive(Debug, Clone)]
pub struct SessionBinding(Arc<Mutex<SessionToken>>);

impl SessionBinding {
    /// Bind to `token`
    pub fn new(token: SessionToken) -> Self {
        Self(Arc::new(Mutex::new(token)))
    }

    /// Current token
    pub fn token(&self) -> SessionToken {
        *self.0.lock()
    }

    /// Replace the token after a reselect
    pub fn rebind(&self, token: SessionToken) {
        *self.0.lock() = token;
    }

    /// Fail unless the bound selection is still live on `channel`
    pub fn check(&self, channel: &CardChannel<'_>) -> Result<(), Error> {
        channel.check_session(&self.token())
    }
}

/// An application protocol running over a [`SmartCardInterface`]
pub trait Session: Clone + Send + Sync + 'static {
    /// Error type of the session's operations
    type Error: From<Error> + Send + 'static;

    /// Application this session talks to
    fn application(&self) -> Application;

    /// Engine the session submits to
    fn smart_card(&self) -> &SmartCardInterface;

    /// Selection the session is bound to
    fn binding(&self) -> &SessionBinding;

    /// Refresh session state from a new SELECT response
    ///
    /// Runs on the worker thread during [`Session::select_application`].
    fn selected(&self, _response: &Bytes) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Select the application again, reviving an invalidated session
    fn select_application(&self) -> Pending<Bytes, Self::Error> {
        let session = self.clone();
        self.smart_card()
            .submit(CommandOptions::default(), move |channel| {
                let (token, response) = channel.reselect(session.application())?;
                session.selected(&response)?;
                session.binding().rebind(token);
                Ok(response)
            })
    }

    /// Send a raw command inside this session
    fn execute(&self, command: Command) -> Pending<Bytes, Self::Error> {
        self.execute_with(command, CommandOptions::default())
    }

    /// Send a raw command inside this session with explicit options
    fn execute_with(
        &self,
        command: Command,
        options: CommandOptions,
    ) -> Pending<Bytes, Self::Error> {
        let binding = self.binding().clone();
        let send_remaining = options.send_remaining;
        self.smart_card().submit(options, move |channel| {
            binding.check(channel)?;
            Ok(channel.transmit_with(&command, send_remaining)?)
        })
    }

    /// Queue a task that first checks the session is still live
    fn run<T, F>(&self, options: CommandOptions, task: F) -> Pending<T, Self::Error>
    where
        T: Send + 'static,
        F: FnOnce(&mut CardChannel<'_>) -> Result<T, Self::Error> + Send + 'static,
    {
        let binding = self.binding().clone();
        self.smart_card().submit(options, move |channel| {
            binding.check(channel)?;
            task(channel)
        })
    }
}
