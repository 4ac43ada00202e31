//! Handshake negotiation.
//!
//! The first message on a connection must be a handshake. Its content is opaque to
//! the protocol: a well-formed handshake envelope is enough to issue an identity.
//!
//! **Per-Session State**
//! Negotiation mutates only the `Session` it is handed. Nothing is stored globally,
//! so concurrent handshakes on different connections never interact.
//!
//! A client that skips the handshake and sends a batch straight away is told so
//! with a `501` status carrying the unnegotiated identity `"0"`.

use crate::core::codec;
use crate::error::{ProtocolError, Result};
use crate::protocol::message::{Request, StatusMessage};
use crate::protocol::session::{Identity, Session};
use crate::utils::metrics::global_metrics;
use tracing::{debug, instrument, warn};

/// Result of feeding a payload to a session awaiting its handshake
#[derive(Debug)]
pub enum Negotiation {
    /// Identity issued; `status` is the `200` reply
    Accepted {
        identity: Identity,
        status: StatusMessage,
        /// The handshake as a logical request, when delegation is enabled
        delegated: Option<Request>,
    },
    /// The client sent a batch before negotiating
    HandshakeMissing(StatusMessage),
}

/// Negotiate `payload` on a session in `AwaitingHandshake`.
///
/// Returns `DeserializeError` for a payload that is neither a handshake nor a
/// batch, and `HandshakeError` if the session is already established.
#[instrument(skip(session, payload), fields(session = %session.id(), bytes = payload.len()))]
pub fn negotiate(session: &mut Session, payload: &[u8], delegate: bool) -> Result<Negotiation> {
    if session.is_established() {
        return Err(ProtocolError::HandshakeError(
            "Session already established".to_string(),
        ));
    }

    let message = match codec::decode_handshake(payload) {
        Ok(message) => message,
        Err(handshake_err) => {
            if codec::decode_batch(payload).is_ok() {
                global_metrics().handshake_missing();
                warn!("Batch received before handshake");
                return Ok(Negotiation::HandshakeMissing(
                    StatusMessage::handshake_missing(),
                ));
            }
            return Err(handshake_err);
        }
    };

    let identity = session.establish()?;
    global_metrics().handshake_success();
    debug!(
        %identity,
        version = message.handshake.protocol_version.as_deref().unwrap_or("-"),
        "Handshake accepted"
    );

    let delegated = delegate.then(|| message.handshake.to_request());
    Ok(Negotiation::Accepted {
        status: StatusMessage::ok(identity.as_str()),
        identity,
        delegated,
    })
}
