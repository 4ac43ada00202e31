//! # Protocol Layer
//!
//! Session negotiation, batch fan-out and scatter-gather aggregation.
//!
//! ## Components
//! - **Message**: wire and domain types
//! - **Session**: per-connection state and issued identity
//! - **Handshake**: identity negotiation on the first message
//! - **Connection**: the per-connection state machine
//! - **Fan-out**: batch to independent sub-requests
//! - **Aggregator**: collects sub-responses back into request order
//! - **Rendezvous**: park/resume handoff for half-duplex carriers
//! - **Dispatcher**: executor seam and a route-table implementation
//!
//! ## Flow
//! ```text
//! bytes -> codec -> Connection (state, identity) -> fan_out -> Dispatch
//!                                                               |
//! Outlet <- codec <- AggregationContext (last one out) <- Completion
//! ```

pub mod aggregator;
pub mod connection;
pub mod dispatcher;
pub mod fanout;
pub mod handshake;
pub mod message;
pub mod rendezvous;
pub mod session;
