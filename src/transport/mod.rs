//! # Transport Layer
//!
//! Delivery seam between the protocol core and the carrier connection, plus two
//! reference carriers.
//!
//! ## Components
//! - **Outlet**: where an aggregated payload goes once a batch completes
//! - **Stream**: full-duplex, newline-framed JSON over any async byte stream or TCP
//! - **Long-poll**: half-duplex HTTP style; POST carries messages, GET parks
//! - **Registry**: session lookup for carriers that reconnect per request
//!
//! Outlets are called from whichever task completed a batch last, so `deliver`
//! must never block.

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::{ProtocolError, Result};
use crate::protocol::rendezvous::{Rendezvous, Resume};
use crate::protocol::session::SessionId;
use crate::utils::metrics::global_metrics;

pub mod long_poll;
pub mod registry;
pub mod stream;

/// Sink for encoded outbound payloads
pub trait Outlet: Send + Sync {
    fn deliver(&self, payload: Bytes) -> Result<()>;
}

/// Full-duplex delivery: payloads are queued for the connection's writer task
#[derive(Clone)]
pub struct ChannelOutlet {
    tx: mpsc::UnboundedSender<Bytes>,
}

impl ChannelOutlet {
    pub fn new(tx: mpsc::UnboundedSender<Bytes>) -> Self {
        Self { tx }
    }
}

impl Outlet for ChannelOutlet {
    fn deliver(&self, payload: Bytes) -> Result<()> {
        self.tx
            .send(payload)
            .map_err(|_| ProtocolError::ConnectionClosed)
    }
}

/// Half-duplex delivery through a parked receive.
///
/// With no receive parked the connection is busy: the payload is dropped and the
/// client is expected to poll again.
pub struct LongPollOutlet {
    rendezvous: Rendezvous,
    session: SessionId,
}

impl LongPollOutlet {
    pub fn new(rendezvous: Rendezvous, session: SessionId) -> Self {
        Self {
            rendezvous,
            session,
        }
    }
}

impl Outlet for LongPollOutlet {
    fn deliver(&self, payload: Bytes) -> Result<()> {
        match self.rendezvous.resume(&self.session, payload) {
            Resume::Resumed => Ok(()),
            Resume::Busy(payload) => {
                global_metrics().long_poll_busy();
                warn!(
                    session = %self.session,
                    bytes = payload.len(),
                    "No parked receive, payload dropped"
                );
                Ok(())
            }
        }
    }
}
