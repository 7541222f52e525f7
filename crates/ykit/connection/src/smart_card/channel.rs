//! Exclusive access to the card for the entry currently executing

use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, trace};
use ykit_apdu_core::application::{INS_SELECT, P1_SELECT_BY_NAME};
use ykit_apdu_core::prelude::*;
use ykit_apdu_core::CommandProcessor;

use super::link::IoLink;
use crate::pending::CancellationToken;
use crate::session::SessionToken;

/// SELECT by name; OATH reuses INS `A4` with P1 `00` for CALCULATE ALL
fn is_select(command: &Command) -> bool {
    command.instruction() == INS_SELECT && command.p1() == P1_SELECT_BY_NAME
}

/// Application currently selected on the card
#[derive(Debug, Default)]
pub(crate) struct Selection {
    current: Option<(Application, Bytes)>,
    epoch: u64,
}

impl Selection {
    fn aid(&self) -> Option<&'static [u8]> {
        self.current.as_ref().map(|(app, _)| app.aid())
    }

    fn invalidate(&mut self) {
        if self.current.take().is_some() {
            self.epoch += 1;
        }
    }
}

/// The card as seen by a queued task
///
/// Only one channel exists at a time; every exchange made through it is part
/// of the same queue entry and shares its deadline and cancellation token.
pub struct CardChannel<'a> {
    pub(crate) link: &'a mut IoLink,
    pub(crate) selection: &'a mut Selection,
    pub(crate) deadline: Instant,
    pub(crate) token: &'a CancellationToken,
    pub(crate) max_chains: usize,
}

impl std::fmt::Debug for CardChannel<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardChannel")
            .field("selected", &self.selected())
            .field("remaining", &self.remaining())
            .finish()
    }
}

impl CardChannel<'_> {
    /// Send `command`, following `61XX` with GET RESPONSE
    pub fn transmit(&mut self, command: &Command) -> Result<Bytes, Error> {
        self.transmit_with(command, SendRemaining::GetResponse)
    }

    /// Send `command`, following `61XX` with `send_remaining`
    ///
    /// A raw SELECT by name sent this way drops the cached selection.
    pub fn transmit_with(
        &mut self,
        command: &Command,
        send_remaining: SendRemaining,
    ) -> Result<Bytes, Error> {
        let response = self.transmit_response(command, send_remaining)?;
        Ok(response.into_bytes_result()?)
    }

    /// Send `command`, following `61XX` with `send_remaining`, and return the
    /// final response whatever its status
    pub fn transmit_response(
        &mut self,
        command: &Command,
        send_remaining: SendRemaining,
    ) -> Result<Response, Error> {
        if is_select(command) {
            self.selection.invalidate();
        }
        let processor = CommandProcessor::new(send_remaining)
            .with_max_chains(self.max_chains)
            .with_max_frame(self.link.max_frame());
        let deadline = self.deadline;
        let token = self.token;
        let link = &mut *self.link;
        let response = processor.process_response(command, |frame| {
            if token.is_cancelled() {
                return Err(Error::Cancelled);
            }
            link.exchange(frame, deadline)
        })?;
        if !response.is_success() {
            debug!(sw = %response.status(), "Command failed");
        }
        Ok(response)
    }

    /// Send a single frame and return the raw response, whatever its status
    pub fn exchange(&mut self, command: &Command) -> Result<Response, Error> {
        if self.token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if is_select(command) {
            self.selection.invalidate();
        }
        let bytes = self.link.exchange(&command.to_bytes(), self.deadline)?;
        Ok(Response::from_bytes(&bytes)?)
    }

    /// Select `application` unless its AID is already selected
    ///
    /// Returns the SELECT response; a cached selection returns the response
    /// recorded when it was made, without a round trip.
    pub fn select(&mut self, application: Application) -> Result<Bytes, Error> {
        if let Some((_, response)) = self
            .selection
            .current
            .as_ref()
            .filter(|(current, _)| current.aid() == application.aid())
        {
            trace!(%application, "Application already selected");
            return Ok(response.clone());
        }
        self.reselect(application).map(|(_, response)| response)
    }

    /// Select `application` with a fresh SELECT and bind a session to it
    pub fn reselect(&mut self, application: Application) -> Result<(SessionToken, Bytes), Error> {
        let command = SelectApplication::new(application).to_command();
        let result = self.transmit(&command);
        match result {
            Ok(response) => {
                self.selection.epoch += 1;
                self.selection.current = Some((application, response.clone()));
                debug!(%application, epoch = self.selection.epoch, "Selected application");
                Ok((SessionToken::new(application, self.selection.epoch), response))
            }
            Err(e) => {
                self.selection.invalidate();
                debug!(%application, error = %e, "Select failed");
                Err(e)
            }
        }
    }

    /// Application currently selected, if known
    pub fn selected(&self) -> Option<Application> {
        self.selection.current.as_ref().map(|(app, _)| *app)
    }

    /// Whether `token` still refers to the live selection
    pub fn check_session(&self, token: &SessionToken) -> Result<(), Error> {
        let live = self.selection.aid() == Some(token.application().aid())
            && self.selection.epoch == token.epoch();
        if live {
            Ok(())
        } else {
            Err(Error::SessionInvalidated)
        }
    }

    /// Time left before the entry's deadline
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Whether the entry was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}
