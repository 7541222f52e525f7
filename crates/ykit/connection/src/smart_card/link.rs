//! Dedicated I/O thread owning the transport
//!
//! The worker hands each frame to the I/O thread and waits with a deadline, so
//! a stuck transport turns into a timeout for the waiting entry. A response
//! that arrives after its deadline is drained before the next frame is written,
//! keeping at most one exchange on the link.

use std::thread;
use std::time::Instant;

use bytes::Bytes;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use tracing::{debug, trace, warn};
use ykit_apdu_core::transport::{CardTransport, TransportError};
use ykit_apdu_core::Error;

pub(crate) struct IoLink {
    requests: Sender<Bytes>,
    responses: Receiver<Result<Bytes, TransportError>>,
    late: bool,
    max_frame: usize,
}

impl IoLink {
    /// Move `transport` onto its own thread
    pub(crate) fn spawn(mut transport: Box<dyn CardTransport>, name: &str) -> Result<Self, Error> {
        let max_frame = transport.max_frame_size();
        let (requests, request_rx) = bounded::<Bytes>(1);
        let (response_tx, responses) = bounded(1);

        thread::Builder::new()
            .name(format!("{name}-io"))
            .spawn(move || {
                for request in request_rx {
                    let response = transport.transmit_raw(&request);
                    if response_tx.send(response).is_err() {
                        break;
                    }
                }
                trace!("I/O thread finished");
            })
            .map_err(|e| Error::message(format!("failed to spawn I/O thread: {e}")))?;

        Ok(Self {
            requests,
            responses,
            late: false,
            max_frame,
        })
    }

    pub(crate) const fn max_frame(&self) -> usize {
        self.max_frame
    }

    /// One request/response round trip bounded by `deadline`
    pub(crate) fn exchange(&mut self, frame: &[u8], deadline: Instant) -> Result<Bytes, Error> {
        self.settle(deadline)?;

        self.requests
            .send(Bytes::copy_from_slice(frame))
            .map_err(|_| Error::Disconnected)?;

        match self.responses.recv_deadline(deadline) {
            Ok(response) => response.map_err(|e| {
                if e.is_link_lost() {
                    Error::Disconnected.with_context(e.to_string())
                } else {
                    Error::Transport(e)
                }
            }),
            Err(RecvTimeoutError::Timeout) => {
                warn!("Exchange exceeded its deadline");
                self.late = true;
                Err(Error::Timeout)
            }
            Err(RecvTimeoutError::Disconnected) => Err(Error::Disconnected),
        }
    }

    /// Drain a response that missed its deadline
    fn settle(&mut self, deadline: Instant) -> Result<(), Error> {
        if !self.late {
            return Ok(());
        }
        match self.responses.recv_deadline(deadline) {
            Ok(_) => {
                debug!("Discarded late response");
                self.late = false;
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => Err(Error::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(Error::Disconnected),
        }
    }
}
