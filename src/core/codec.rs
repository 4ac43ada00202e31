//! # Message Codec
//!
//! Pure transform between raw payloads and typed protocol messages.
//!
//! Inbound payloads are decoded according to the connection state: the first
//! message must be a handshake, every later one a batch. Outbound status and
//! aggregated response messages are encoded as compact JSON.
//!
//! ## Wire Format
//! ```text
//! handshake:  {"handshake": {"protocolVersion": "1.0", "path": "/", ...}}
//! batch:      {"identity": "...", "requests": [{"uuid", "method", "path", ...}]}
//! status:     {"status": {"statusCode": 200, "reasonPhrase": "OK"}, "identity": "..."}
//! responses:  {"identity": "...", "responses": [{"uuid", "status", "messageBody", ...}]}
//! ```
//!
//! Malformed input, including non-UTF-8 text, always surfaces as
//! `ProtocolError::DeserializeError`; the codec never panics on input.

use bytes::Bytes;
use serde::Serialize;
use std::collections::HashSet;

use crate::error::{constants, ProtocolError, Result};
use crate::protocol::message::{Batch, HandshakeMessage, Inbound, Outbound};

/// Decode a handshake message
pub fn decode_handshake(data: &[u8]) -> Result<HandshakeMessage> {
    Ok(serde_json::from_slice(data)?)
}

/// Decode a batch message and check its structural invariants
pub fn decode_batch(data: &[u8]) -> Result<Batch> {
    let batch: Batch = serde_json::from_slice(data)?;
    validate_batch(&batch)?;
    Ok(batch)
}

/// Decode either inbound message kind by shape
pub fn decode_inbound(data: &[u8]) -> Result<Inbound> {
    let inbound: Inbound = serde_json::from_slice(data)?;
    if let Inbound::Batch(batch) = &inbound {
        validate_batch(batch)?;
    }
    Ok(inbound)
}

/// Decode a server message (client side and tests)
pub fn decode_outbound(data: &[u8]) -> Result<Outbound> {
    Ok(serde_json::from_slice(data)?)
}

/// Encode any protocol message as compact JSON
pub fn encode<T: Serialize>(message: &T) -> Result<Bytes> {
    serde_json::to_vec(message)
        .map(Bytes::from)
        .map_err(|e| ProtocolError::SerializeError(e.to_string()))
}

/// Reject payloads above `max_size` before touching the parser
pub fn check_size(data: &[u8], max_size: usize) -> Result<()> {
    if data.len() > max_size {
        return Err(ProtocolError::DeserializeError(format!(
            "{}: {} bytes (limit {max_size})",
            constants::ERR_OVERSIZED_MESSAGE,
            data.len()
        )));
    }
    Ok(())
}

fn validate_batch(batch: &Batch) -> Result<()> {
    if batch.requests.is_empty() {
        return Err(ProtocolError::DeserializeError(
            constants::ERR_EMPTY_BATCH.to_string(),
        ));
    }

    let mut seen = HashSet::with_capacity(batch.requests.len());
    for request in &batch.requests {
        if !seen.insert(request.uuid.as_str()) {
            return Err(ProtocolError::DeserializeError(format!(
                "Duplicate request uuid in batch: {}",
                request.uuid
            )));
        }
    }
    Ok(())
}
