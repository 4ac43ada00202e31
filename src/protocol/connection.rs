//! # Protocol State Machine
//!
//! One `Connection` per carrier connection. It owns the `Session`, validates every
//! inbound message against the session state and identity, and fans batches out
//! to the dispatcher.
//!
//! ## States
//! - `AwaitingHandshake`: payloads are negotiated as handshakes; a batch yields `501`
//! - `Established`: payloads are batches; a foreign identity yields `503`
//!
//! Status replies are returned to the caller synchronously. Aggregated responses
//! arrive later through the connection's `Outlet`, from whichever task completes a
//! batch last.
//!
//! Decode failures drop the message and leave the connection open. Only contract
//! violations by the carrier (overlapping batches, use after close) are returned
//! as errors.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use crate::config::ServerConfig;
use crate::core::codec;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::aggregator::BatchSlot;
use crate::protocol::dispatcher::Dispatch;
use crate::protocol::fanout::fan_out;
use crate::protocol::handshake::{self, Negotiation};
use crate::protocol::message::{Response, StatusMessage};
use crate::protocol::session::{Identity, Session, SessionId, SessionState};
use crate::transport::{ChannelOutlet, Outlet};
use crate::utils::metrics::global_metrics;

/// What handling one inbound message produced synchronously
#[derive(Debug, Default)]
pub struct InboundOutcome {
    /// Status replies to write back immediately, in order
    pub replies: Vec<StatusMessage>,
    /// Sub-requests handed to the dispatcher
    pub dispatched: usize,
}

impl InboundOutcome {
    fn reply(status: StatusMessage) -> Self {
        Self {
            replies: vec![status],
            dispatched: 0,
        }
    }

    fn dropped() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.replies.is_empty() && self.dispatched == 0
    }

    /// Wire form of the status replies
    pub fn encode_replies(&self) -> Result<Vec<Bytes>> {
        self.replies.iter().map(codec::encode).collect()
    }
}

pub struct Connection {
    id: SessionId,
    session: Mutex<Session>,
    config: Arc<ServerConfig>,
    dispatcher: Arc<dyn Dispatch>,
    outlet: Arc<dyn Outlet>,
    batch: BatchSlot,
    closed: AtomicBool,
}

impl Connection {
    pub fn new(
        id: SessionId,
        config: Arc<ServerConfig>,
        dispatcher: Arc<dyn Dispatch>,
        outlet: Arc<dyn Outlet>,
    ) -> Self {
        global_metrics().session_opened();
        debug!(session = %id, "Session opened");
        Self {
            session: Mutex::new(Session::new(id.clone())),
            id,
            config,
            dispatcher,
            outlet,
            batch: BatchSlot::default(),
            closed: AtomicBool::new(false),
        }
    }

    /// Full-duplex connection whose aggregated payloads are queued on a channel
    pub fn with_channel(
        id: SessionId,
        config: Arc<ServerConfig>,
        dispatcher: Arc<dyn Dispatch>,
    ) -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let outlet = Arc::new(ChannelOutlet::new(tx));
        (Self::new(id, config, dispatcher, outlet), rx)
    }

    pub fn session_id(&self) -> &SessionId {
        &self.id
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn state(&self) -> Result<SessionState> {
        Ok(self.session()?.state())
    }

    pub fn identity(&self) -> Result<Option<Identity>> {
        Ok(self.session()?.identity().cloned())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn session(&self) -> Result<MutexGuard<'_, Session>> {
        self.session
            .lock()
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.into()))
    }

    /// Handle one raw inbound message
    #[instrument(skip(self, payload), fields(session = %self.id, bytes = payload.len()))]
    pub fn on_inbound_message(&self, payload: &[u8]) -> Result<InboundOutcome> {
        if self.is_closed() {
            return Err(ProtocolError::ConnectionClosed);
        }
        if let Err(e) = codec::check_size(payload, self.config.max_message_size) {
            return Ok(Self::drop_malformed(e));
        }

        let mut session = self.session()?;
        if session.is_established() {
            let identity = session.identity().cloned();
            drop(session);
            return match identity {
                Some(identity) => self.on_batch(&identity, payload),
                None => Err(ProtocolError::HandshakeRequired),
            };
        }

        let negotiation = handshake::negotiate(&mut session, payload, self.config.delegate_handshake);
        drop(session);

        match negotiation {
            Ok(Negotiation::Accepted {
                identity,
                status,
                delegated,
            }) => {
                let dispatched = match delegated {
                    Some(request) => fan_out(
                        &identity,
                        vec![request],
                        &self.config,
                        &self.batch,
                        Arc::clone(&self.outlet),
                        self.dispatcher.as_ref(),
                    )?,
                    None => 0,
                };
                Ok(InboundOutcome {
                    replies: vec![status],
                    dispatched,
                })
            }
            Ok(Negotiation::HandshakeMissing(status)) => Ok(InboundOutcome::reply(status)),
            Err(e) => Ok(Self::drop_malformed(e)),
        }
    }

    fn on_batch(&self, identity: &Identity, payload: &[u8]) -> Result<InboundOutcome> {
        let batch = match codec::decode_batch(payload) {
            Ok(batch) => batch,
            Err(e) => return Ok(Self::drop_malformed(e)),
        };

        if batch.identity != identity.as_str() {
            global_metrics().identity_rejected();
            warn!(%identity, offered = %batch.identity, "Batch identity rejected");
            return Ok(InboundOutcome::reply(StatusMessage::not_allowed(
                identity.as_str(),
            )));
        }

        let dispatched = fan_out(
            identity,
            batch.requests,
            &self.config,
            &self.batch,
            Arc::clone(&self.outlet),
            self.dispatcher.as_ref(),
        )?;
        Ok(InboundOutcome {
            replies: Vec::new(),
            dispatched,
        })
    }

    fn drop_malformed(error: ProtocolError) -> InboundOutcome {
        global_metrics().decode_error();
        warn!(error = %error, "Malformed message dropped");
        InboundOutcome::dropped()
    }

    /// Feed back the response for sub-request `uuid` of the open batch.
    ///
    /// The dispatcher must have given up that sub-request with
    /// [`SubRequest::defer`](crate::protocol::fanout::SubRequest::defer); a
    /// sub-request simply dropped is already answered `500`.
    ///
    /// On a session that never negotiated, the `501` status is delivered through
    /// the outlet and `HandshakeRequired` is returned.
    #[instrument(skip(self, response), fields(session = %self.id, status = response.status))]
    pub fn on_sub_response_ready(&self, uuid: &str, response: Response) -> Result<()> {
        if !self.session()?.is_established() {
            global_metrics().handshake_missing();
            let payload = codec::encode(&StatusMessage::handshake_missing())?;
            self.outlet.deliver(payload)?;
            return Err(ProtocolError::HandshakeRequired);
        }

        match self.batch.current() {
            Some(context) => context.complete(uuid, response),
            None => Err(ProtocolError::UnknownCorrelation(uuid.to_string())),
        }
    }

    /// Tear the session down. Late completions of an open batch are discarded.
    /// Returns false if already closed.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        if self.batch.abort() {
            debug!(session = %self.id, "Open batch aborted on close");
        }
        global_metrics().session_closed();
        debug!(session = %self.id, "Session closed");
        true
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}
