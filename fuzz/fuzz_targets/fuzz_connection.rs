#![no_main]

use std::sync::Arc;

use libfuzzer_sys::fuzz_target;
use swaggersocket::config::ServerConfig;
use swaggersocket::protocol::connection::Connection;
use swaggersocket::protocol::fanout::SubRequest;
use swaggersocket::protocol::message::Response;
use swaggersocket::protocol::session::SessionId;

fuzz_target!(|data: &[u8]| {
    let dispatcher = Arc::new(|sub: SubRequest| {
        let _ = sub.complete(Response::ok());
    });
    let (conn, _rx) = Connection::with_channel(
        SessionId::generate(),
        Arc::new(ServerConfig::default()),
        dispatcher,
    );

    // Same input before and after the handshake
    let _ = conn.on_inbound_message(data);
    let _ = conn.on_inbound_message(br#"{"handshake":{}}"#);
    let _ = conn.on_inbound_message(data);
});
