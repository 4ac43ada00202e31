//! # Half-Duplex Rendezvous
//!
//! Lets a passive receive (a long-poll GET) wait for a payload produced on another
//! task. A receive parks a one-shot handle keyed by session; the next `resume` for
//! that session removes the handle and wakes it exactly once. With nothing parked,
//! `resume` reports `Busy` and hands the payload back untouched.
//!
//! ## Guarantees
//! - At most one live parked receive per session
//! - A handle is removed before it is woken, so it can never be resumed twice
//! - A receive that times out or is dropped unparks itself, unless a newer receive
//!   has already replaced it

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::error::{constants, ProtocolError, Result};
use crate::protocol::session::SessionId;
use crate::utils::metrics::global_metrics;

/// Outcome of offering a payload to a session
#[derive(Debug, PartialEq, Eq)]
pub enum Resume {
    /// A parked receive took the payload
    Resumed,
    /// Nothing was parked; the payload is returned
    Busy(Bytes),
}

struct Parked {
    ticket: u64,
    tx: oneshot::Sender<Bytes>,
}

/// Shared park/resume table
#[derive(Clone, Default)]
pub struct Rendezvous {
    parked: Arc<Mutex<HashMap<SessionId, Parked>>>,
    tickets: Arc<AtomicU64>,
}

impl Rendezvous {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<SessionId, Parked>>> {
        self.parked
            .lock()
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.into()))
    }

    /// Park a receive for `session`.
    ///
    /// Fails with `AlreadyParked` if a live receive is already waiting. A handle
    /// whose receiver is gone is replaced silently.
    pub fn park(&self, session: &SessionId) -> Result<ParkedReceive> {
        let mut parked = self.lock()?;
        if parked.get(session).is_some_and(|p| !p.tx.is_closed()) {
            return Err(ProtocolError::AlreadyParked(session.to_string()));
        }

        let ticket = self.tickets.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        parked.insert(session.clone(), Parked { ticket, tx });
        global_metrics().long_poll_parked();
        trace!(%session, ticket, "Receive parked");

        Ok(ParkedReceive {
            rendezvous: self.clone(),
            session: session.clone(),
            ticket,
            rx,
            finished: false,
        })
    }

    /// Wake the parked receive for `session` with `payload`
    pub fn resume(&self, session: &SessionId, payload: Bytes) -> Resume {
        let parked = match self.lock() {
            Ok(mut table) => table.remove(session),
            Err(_) => None,
        };

        match parked {
            Some(Parked { tx, ticket }) => match tx.send(payload) {
                Ok(()) => {
                    global_metrics().long_poll_resumed();
                    debug!(%session, ticket, "Parked receive resumed");
                    Resume::Resumed
                }
                Err(payload) => Resume::Busy(payload),
            },
            None => Resume::Busy(payload),
        }
    }

    /// Drop any parked receive for `session`; its waiter observes a closed connection
    pub fn cancel(&self, session: &SessionId) -> bool {
        self.lock()
            .map(|mut table| table.remove(session).is_some())
            .unwrap_or(false)
    }

    pub fn is_parked(&self, session: &SessionId) -> bool {
        self.lock()
            .map(|table| table.get(session).is_some_and(|p| !p.tx.is_closed()))
            .unwrap_or(false)
    }

    /// Remove the entry only if it still belongs to `ticket`
    fn unpark(&self, session: &SessionId, ticket: u64) {
        if let Ok(mut table) = self.lock() {
            if table.get(session).is_some_and(|p| p.ticket == ticket) {
                table.remove(session);
                trace!(%session, ticket, "Receive unparked");
            }
        }
    }
}

/// A parked receive waiting for its payload
pub struct ParkedReceive {
    rendezvous: Rendezvous,
    session: SessionId,
    ticket: u64,
    rx: oneshot::Receiver<Bytes>,
    finished: bool,
}

impl ParkedReceive {
    pub fn session(&self) -> &SessionId {
        &self.session
    }

    /// Wait until resumed; `ConnectionClosed` if the handle was cancelled
    pub async fn recv(mut self) -> Result<Bytes> {
        let result = (&mut self.rx).await;
        self.finished = true;
        result.map_err(|_| ProtocolError::ConnectionClosed)
    }

    /// Wait at most `timeout`, unparking on expiry
    pub async fn recv_timeout(mut self, timeout: Duration) -> Result<Bytes> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(result) => {
                self.finished = true;
                result.map_err(|_| ProtocolError::ConnectionClosed)
            }
            Err(_) => {
                self.rendezvous.unpark(&self.session, self.ticket);
                self.finished = true;
                // A resume may have taken the handle before the unpark; closing
                // first makes its send either land here or come back as Busy
                self.rx.close();
                self.rx.try_recv().map_err(|_| ProtocolError::Timeout)
            }
        }
    }
}

impl Drop for ParkedReceive {
    fn drop(&mut self) {
        if !self.finished {
            self.rendezvous.unpark(&self.session, self.ticket);
        }
    }
}
