//! # Core Protocol Components
//!
//! Wire-level encoding and decoding of protocol messages.
//!
//! ## Components
//! - **Codec**: JSON transform between raw payloads and typed messages
//!
//! ## Security
//! - Maximum inbound message size is enforced before parsing (`check_size`)
//! - Malformed input is reported as an error, never as a panic

pub mod codec;
