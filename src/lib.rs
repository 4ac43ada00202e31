//! # SwaggerSocket
//!
//! Multiplexes many HTTP-style request/response exchanges over one long-lived
//! connection. A client negotiates a session identity, then sends batches of
//! logical requests; each batch is answered by exactly one message holding every
//! response in the original request order.
//!
//! ## Modules
//! - [`protocol`]: state machine, fan-out, aggregation, rendezvous
//! - [`core`]: JSON message codec
//! - [`transport`]: delivery outlets, stream server, long-poll endpoint, registry
//! - [`config`]: TOML/env configuration with validation
//! - [`utils`]: logging setup and metrics
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use swaggersocket::config::ServerConfig;
//! use swaggersocket::protocol::connection::Connection;
//! use swaggersocket::protocol::fanout::SubRequest;
//! use swaggersocket::protocol::message::Response;
//! use swaggersocket::protocol::session::SessionId;
//!
//! let dispatcher = Arc::new(|sub: SubRequest| {
//!     let body = format!("hello {}", sub.parts().path);
//!     let _ = sub.complete(Response::ok().with_body(body));
//! });
//! let (conn, mut outbound) =
//!     Connection::with_channel(SessionId::generate(), Arc::new(ServerConfig::default()), dispatcher);
//!
//! let outcome = conn.on_inbound_message(br#"{"handshake":{}}"#).unwrap();
//! let identity = outcome.replies[0].identity.clone();
//!
//! let batch = format!(r#"{{"identity":"{identity}","requests":[{{"uuid":"1","method":"GET","path":"/a"}}]}}"#);
//! conn.on_inbound_message(batch.as_bytes()).unwrap();
//! assert!(outbound.try_recv().is_ok());
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod utils;

pub use config::{ProtocolConfig, ServerConfig};
pub use error::{ProtocolError, Result};
pub use protocol::connection::{Connection, InboundOutcome};
pub use protocol::dispatcher::{Dispatch, Dispatcher};
pub use protocol::message::{Request, Response, StatusMessage};
pub use protocol::session::{Identity, SessionId};
pub use transport::Outlet;
