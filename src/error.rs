//! # Error Types
//!
//! Error handling for the multiplexing protocol.
//!
//! This module defines all error variants that can occur while negotiating a
//! session, decoding batches, correlating sub-responses and delivering the
//! aggregated result back over the transport.
//!
//! ## Error Categories
//! - **Codec Errors**: malformed inbound payloads, unencodable outbound bodies
//! - **Protocol-State Errors**: traffic before handshake, identity mismatch
//! - **Contract Violations**: duplicate completions, overlapping batches, double parking
//! - **Transport Errors**: closed connections, long-poll timeouts
//! - **Configuration Errors**: unreadable or invalid configuration
//!
//! Decode and protocol-state errors are answered on the wire and never tear a
//! connection down. Contract violations are surfaced to the collaborator that
//! broke the contract.
//!
//! ## Example Usage
//! ```rust
//! use swaggersocket::core::codec;
//! use swaggersocket::error::ProtocolError;
//!
//! match codec::decode_batch(b"not json") {
//!     Err(ProtocolError::DeserializeError(reason)) => assert!(!reason.is_empty()),
//!     other => panic!("unexpected: {other:?}"),
//! }
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Synchronisation
    pub const ERR_LOCK_POISONED: &str = "Synchronization primitive poisoned";

    /// Codec errors
    pub const ERR_EMPTY_BATCH: &str = "Batch must carry at least one request";
    pub const ERR_NON_UTF8_BODY: &str = "Message body is not valid UTF-8";
    pub const ERR_OVERSIZED_MESSAGE: &str = "Message exceeds maximum size";

    /// Protocol-state status texts
    pub const STATUS_OK: &str = "OK";
    pub const STATUS_NOT_ALLOWED: &str = "Not Allowed";
    pub const STATUS_HANDSHAKE_MISSING: &str = "Protocol error. Handshake not occurred yet!";
    pub const STATUS_INTERNAL_ERROR: &str = "Internal Server Error";
    pub const STATUS_NOT_FOUND: &str = "Not Found";
    pub const STATUS_GATEWAY_TIMEOUT: &str = "Gateway Timeout";

    /// Identity placed on status messages for sessions that never negotiated one
    pub const UNNEGOTIATED_IDENTITY: &str = "0";
}

// ProtocolError is the primary error type for all protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Deserialize error: {0}")]
    DeserializeError(String),

    #[error("Handshake failed: {0}")]
    HandshakeError(String),

    #[error("Batch identity does not match the session identity")]
    IdentityMismatch,

    #[error("Handshake has not occurred for this session")]
    HandshakeRequired,

    #[error("A batch is already being aggregated for this session")]
    OverlappingBatch,

    #[error("Duplicate completion for request {0}")]
    DuplicateCompletion(String),

    #[error("No open batch expects a response for request {0}")]
    UnknownCorrelation(String),

    #[error("Aggregation context is no longer open")]
    ContextClosed,

    #[error("A receive is already parked for session {0}")]
    AlreadyParked(String),

    #[error("Unknown session: {0}")]
    SessionNotFound(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Timeout occurred")]
    Timeout,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            ProtocolError::Io(err.into())
        } else {
            ProtocolError::DeserializeError(err.to_string())
        }
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
