//! # Long-Poll Endpoint
//!
//! Half-duplex carrier in the style of HTTP long-polling. The client never keeps a
//! socket open; instead:
//!
//! - `open` allocates a session id (the cookie)
//! - `post` carries one protocol message; the POST response body holds the status
//!   replies, if any
//! - `poll` is the passive GET: it parks until an aggregated payload is ready or the
//!   long-poll timeout elapses
//!
//! An aggregated payload that completes while no GET is parked is dropped; the
//! client polls again.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, instrument};

use crate::config::ServerConfig;
use crate::error::{ProtocolError, Result};
use crate::protocol::connection::Connection;
use crate::protocol::dispatcher::Dispatch;
use crate::protocol::rendezvous::Rendezvous;
use crate::protocol::session::SessionId;
use crate::transport::registry::SessionRegistry;
use crate::transport::LongPollOutlet;

#[derive(Clone)]
pub struct LongPollEndpoint {
    config: Arc<ServerConfig>,
    dispatcher: Arc<dyn Dispatch>,
    registry: SessionRegistry,
    rendezvous: Rendezvous,
}

impl LongPollEndpoint {
    pub fn new(config: Arc<ServerConfig>, dispatcher: Arc<dyn Dispatch>) -> Self {
        Self {
            registry: SessionRegistry::from_config(&config),
            rendezvous: Rendezvous::new(),
            config,
            dispatcher,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn rendezvous(&self) -> &Rendezvous {
        &self.rendezvous
    }

    /// Allocate a new session
    pub async fn open(&self) -> SessionId {
        let id = SessionId::generate();
        self.connection(&id).await;
        info!(session = %id, "Long-poll session opened");
        id
    }

    async fn connection(&self, id: &SessionId) -> Arc<Connection> {
        self.registry
            .get_or_insert_with(id, || {
                let outlet = Arc::new(LongPollOutlet::new(self.rendezvous.clone(), id.clone()));
                Arc::new(Connection::new(
                    id.clone(),
                    Arc::clone(&self.config),
                    Arc::clone(&self.dispatcher),
                    outlet,
                ))
            })
            .await
    }

    /// Deliver one inbound message for `session`, creating the session on first use.
    /// Returns the encoded status replies.
    #[instrument(skip(self, body), fields(session = %session, bytes = body.len()))]
    pub async fn post(&self, session: &SessionId, body: &[u8]) -> Result<Vec<Bytes>> {
        let connection = self.connection(session).await;
        let outcome = connection.on_inbound_message(body)?;
        debug!(
            replies = outcome.replies.len(),
            dispatched = outcome.dispatched,
            "Long-poll message handled"
        );
        outcome.encode_replies()
    }

    /// Wait for the next aggregated payload for `session`.
    ///
    /// Fails with `SessionNotFound` for an unknown session, `AlreadyParked` if a
    /// poll is already waiting, and `Timeout` once the long-poll timeout elapses.
    #[instrument(skip(self), fields(session = %session))]
    pub async fn poll(&self, session: &SessionId) -> Result<Bytes> {
        if self.registry.get(session).await.is_none() {
            return Err(ProtocolError::SessionNotFound(session.to_string()));
        }
        let parked = self.rendezvous.park(session)?;
        parked.recv_timeout(self.config.long_poll_timeout).await
    }

    /// End a session: abort its open batch and release any waiting poll
    pub async fn close(&self, session: &SessionId) -> bool {
        let removed = self.registry.remove(session).await.is_some();
        let cancelled = self.rendezvous.cancel(session);
        if removed {
            info!(session = %session, cancelled, "Long-poll session closed");
        }
        removed
    }
}
