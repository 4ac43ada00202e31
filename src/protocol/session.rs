//! Per-connection session state.
//!
//! A `Session` is created with the connection, receives its identity exactly once
//! at a successful handshake and is dropped with the connection. It is never shared
//! between connections.

use std::fmt;

use uuid::Uuid;

use crate::error::{ProtocolError, Result};

/// Opaque token issued at handshake and required on every later batch
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    /// Random, globally unique identity
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transport-level key of a session (connection id, or cookie for HTTP)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingHandshake,
    Established,
}

#[derive(Debug)]
pub struct Session {
    id: SessionId,
    state: SessionState,
    identity: Option<Identity>,
}

impl Session {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            state: SessionState::AwaitingHandshake,
            identity: None,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_established(&self) -> bool {
        self.state == SessionState::Established
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Assign a fresh identity and move to `Established`.
    ///
    /// Identity reassignment is refused: a session handshakes once.
    pub fn establish(&mut self) -> Result<Identity> {
        if self.is_established() {
            return Err(ProtocolError::HandshakeError(
                "Session already established".to_string(),
            ));
        }
        let identity = Identity::generate();
        self.identity = Some(identity.clone());
        self.state = SessionState::Established;
        Ok(identity)
    }

    /// Whether `candidate` is the identity issued to this session
    pub fn accepts(&self, candidate: &str) -> bool {
        self.identity
            .as_ref()
            .is_some_and(|identity| identity.as_str() == candidate)
    }
}
